use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use vgcn_reconciler::config::{load_desired_state, FsConfigReader};
use vgcn_reconciler::logging::init_logging;
use vgcn_reconciler::splitter::allocate;

/// Produce a resources document diverting a fraction of each group to a
/// secondary HTCondor cluster image.
#[derive(Parser, Debug)]
#[command(name = "vgcn-split")]
struct Cli {
    #[arg(short = 'r', long = "resources-file", default_value = "resources.yaml")]
    resources_file: PathBuf,

    #[arg(short = 'f', long = "fraction", default_value_t = 0.0)]
    fraction: f64,

    #[arg(short = 'o', long = "output-file")]
    output_file: Option<PathBuf>,

    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let state = match load_desired_state(&FsConfigReader, &cli.resources_file) {
        Ok(state) => state,
        Err(err) => {
            error!(error_msg = %err, "could not load resources file");
            return ExitCode::from(3);
        }
    };

    let split = match allocate(&state, cli.fraction) {
        Ok(split) => split,
        Err(err) => {
            error!(error_msg = %err, "invalid fraction");
            return ExitCode::from(3);
        }
    };

    let rendered = match serde_yaml::to_string(&split) {
        Ok(rendered) => rendered,
        Err(err) => {
            error!(error_msg = %err, "could not serialize split resources document");
            return ExitCode::from(3);
        }
    };

    match &cli.output_file {
        Some(path) => {
            if let Err(err) = fs::write(path, rendered) {
                error!(error_msg = %err, path = %path.display(), "could not write output file");
                return ExitCode::from(3);
            }
        }
        None => println!("{rendered}"),
    }

    ExitCode::from(0)
}
