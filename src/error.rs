use std::fmt::Display;

use thiserror::Error;

use crate::capacity::CapacityError;
use crate::cloud::{CloudAPIError, Server};
use crate::config::ConfigError;
use crate::reconciler::ApplyError;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("could not load configuration: `{0}`")]
    Config(#[from] ConfigError),

    #[error("capacity validation failed: `{0}`")]
    Capacity(#[from] CapacityError),

    #[error("could not list servers from the cloud: `{0}`")]
    CloudAPI(#[from] CloudAPIError),

    #[error("one or more actions failed during apply: {0}")]
    Apply(ApplyFailures),
}

/// Aggregates the per-server failures collected while applying a plan, so
/// one bad server doesn't prevent logging what happened to the rest
/// (§4.7 failure isolation).
#[derive(Debug, Default)]
pub struct ApplyFailures(pub Vec<(String, ApplyError)>);

impl ApplyFailures {
    pub fn push(&mut self, server_or_group: impl Into<String>, error: ApplyError) {
        self.0.push((server_or_group.into(), error));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for ApplyFailures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|(who, error)| format!("{who}: {error}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "[{joined}]")
    }
}

/// Shared identification for log messages: a server's name if known, the
/// group id otherwise.
pub fn describe(server: Option<&Server>, group_id: &str) -> String {
    match server {
        Some(s) => format!("{group_id}/{}", s.name),
        None => group_id.to_string(),
    }
}
