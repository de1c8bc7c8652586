use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::DesiredState;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read resources file `{path}`: `{source}`")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse resources file `{path}` as YAML: `{source}`")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("group identifier `{0}` is a prefix of `{1}`, which makes name-bucketing ambiguous")]
    AmbiguousGroupPrefix(String, String),
}

/// Abstracts the resources-file read so tests can substitute an in-memory
/// source without touching the filesystem.
pub trait ConfigReader {
    fn read(&self, path: &Path) -> Result<String, ConfigError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsConfigReader;

impl ConfigReader for FsConfigReader {
    fn read(&self, path: &Path) -> Result<String, ConfigError> {
        fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub fn load_desired_state(
    reader: &impl ConfigReader,
    path: &Path,
) -> Result<DesiredState, ConfigError> {
    let raw = reader.read(path)?;
    let state: DesiredState = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    super::validate_group_identifiers(&state)?;
    Ok(state)
}
