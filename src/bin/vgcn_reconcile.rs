use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use vgcn_reconciler::capacity::CapacityError;
use vgcn_reconciler::cloud::CloudClient;
use vgcn_reconciler::config::{load_desired_state, FsConfigReader};
use vgcn_reconciler::error::ReconcileError;
use vgcn_reconciler::logging::init_logging;
use vgcn_reconciler::reconciler::{reconcile, ReconcileOutcome, ReconcileTimeouts, UserDataRenderer};
use vgcn_reconciler::terminator::SshParams;

/// Reconcile an HTCondor compute-cloud VM fleet against a desired-state
/// document.
#[derive(Parser, Debug)]
#[command(name = "vgcn-reconcile")]
struct Cli {
    #[arg(short = 'r', long = "resources-file", default_value = "resources.yaml")]
    resources_file: PathBuf,

    #[arg(short = 'u', long = "userdata-file", default_value = "userdata.yaml.j2")]
    userdata_file: PathBuf,

    /// Name of the `clouds.yaml` entry identifying the OpenStack project to
    /// reconcile against.
    #[arg(short = 'c', long = "openstack-cloud")]
    openstack_cloud: Option<String>,

    #[arg(short = 'd', long = "dry-run")]
    dry_run: bool,

    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long = "ssh-private-key", default_value = "~/.ssh/id_rsa")]
    ssh_private_key: PathBuf,

    #[arg(long = "ssh-user", default_value = "centos")]
    ssh_user: String,

    #[arg(long = "ssh-port", default_value_t = 22)]
    ssh_port: u16,
}

/// The OpenStack-backed `CloudClient` is an external collaborator (§1
/// Non-goals of SPEC_FULL.md — "explicitly out of scope... interfaces
/// only"). This placeholder documents the integration seam a deployment
/// wires a real client into; every call fails loudly rather than silently
/// no-op'ing.
struct UnconfiguredCloudClient;

impl CloudClient for UnconfiguredCloudClient {
    fn list_servers(&self) -> Result<Vec<vgcn_reconciler::cloud::Server>, vgcn_reconciler::cloud::CloudAPIError> {
        Err(vgcn_reconciler::cloud::CloudAPIError::Request(
            "no OpenStack client wired in; provide one via `openstack_cloud`".into(),
        ))
    }
    fn find_server(&self, _id: &str) -> Result<Option<vgcn_reconciler::cloud::Server>, vgcn_reconciler::cloud::CloudAPIError> {
        Err(vgcn_reconciler::cloud::CloudAPIError::Request("unconfigured".into()))
    }
    fn create_server(&self, _spec: vgcn_reconciler::cloud::CreateServerSpec) -> Result<vgcn_reconciler::cloud::Server, vgcn_reconciler::cloud::CloudAPIError> {
        Err(vgcn_reconciler::cloud::CloudAPIError::Request("unconfigured".into()))
    }
    fn delete_server(&self, _server: &vgcn_reconciler::cloud::Server) -> Result<(), vgcn_reconciler::cloud::CloudAPIError> {
        Err(vgcn_reconciler::cloud::CloudAPIError::Request("unconfigured".into()))
    }
    fn find_image(&self, name_or_id: &str) -> Result<String, vgcn_reconciler::cloud::CloudAPIError> {
        Err(vgcn_reconciler::cloud::CloudAPIError::ImageNotFound(name_or_id.into()))
    }
    fn find_flavor(&self, name_or_id: &str) -> Result<String, vgcn_reconciler::cloud::CloudAPIError> {
        Err(vgcn_reconciler::cloud::CloudAPIError::FlavorNotFound(name_or_id.into()))
    }
    fn find_network(&self, name_or_id: &str) -> Result<String, vgcn_reconciler::cloud::CloudAPIError> {
        Err(vgcn_reconciler::cloud::CloudAPIError::NetworkNotFound(name_or_id.into()))
    }
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

    let cloud = UnconfiguredCloudClient;
    let renderer = UserDataRenderer {
        template_path: &cli.userdata_file,
        vars_files: &[],
    };
    let ssh_params = SshParams {
        port: cli.ssh_port,
        user: &cli.ssh_user,
        private_key_path: &cli.ssh_private_key,
        trusted_pubkeys: &state.pubkeys,
    };
    let timeouts = ReconcileTimeouts::default();
    let today = chrono::Local::now().date_naive();

    match reconcile(
        &state,
        &cloud,
        &renderer,
        &ssh_params,
        &timeouts,
        today,
        cli.dry_run,
    ) {
        Ok(outcome) => {
            log_outcome(&outcome);
            ExitCode::from(0)
        }
        Err(err) => {
            error!(error_msg = %err, "reconciliation failed");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &ReconcileError) -> u8 {
    match err {
        ReconcileError::Config(_) => 3,
        ReconcileError::Capacity(CapacityError::Conflict(_)) => 1,
        ReconcileError::CloudAPI(_) => 3,
        ReconcileError::Apply(_) => 2,
    }
}

fn log_outcome(outcome: &ReconcileOutcome) {
    for group in &outcome.groups {
        info!(
            group = %group.group_id,
            added = group.added,
            removed = group.removed,
            replaced = group.replaced,
            failed = group.failed,
            dry_run = outcome.dry_run,
            "reconciliation summary"
        );
    }
}
