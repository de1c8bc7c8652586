//! Graceful Terminator (§4.5): orchestrates Condor shutdown with a timeout,
//! then issues cloud deletion and waits for the server to disappear.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{instrument, warn};

use crate::cloud::{CloudAPIError, CloudClient, Server, ServerStatus};
use crate::condor::{self, CondorError};
use crate::ssh::{self, RemoteCommandError};

#[derive(Error, Debug)]
pub enum TerminatorError {
    #[error(transparent)]
    Condor(#[from] CondorError),

    #[error(transparent)]
    RemoteCommand(#[from] RemoteCommandError),

    #[error(transparent)]
    CloudAPI(#[from] CloudAPIError),

    #[error("server `{0}` was not deleted within the allotted time")]
    DeleteTimeout(String),
}

pub struct SshParams<'a> {
    pub port: u16,
    pub user: &'a str,
    pub private_key_path: &'a Path,
    pub trusted_pubkeys: &'a [String],
}

/// If the server is `ACTIVE`, SSH in and run the full Condor drain/off
/// sequence with a wall-clock timeout, then delete the server and wait for
/// it to disappear. `NoSSHAccess` is logged and the removal is skipped for
/// this cycle rather than escalated to a brutal delete, matching the
/// original implementation's behavior of leaving an unreachable node
/// running rather than risk deleting a node that may still be serving
/// jobs. `CondorShutdownTimeout` is propagated rather than swallowed here —
/// the caller decides whether to fall back to `brutally_terminate` (§4.5).
#[instrument(skip(cloud, ssh_params), fields(server = %server.name))]
pub fn gracefully_terminate(
    server: &Server,
    cloud: &dyn CloudClient,
    ssh_params: &SshParams,
    condor_timeout: Duration,
    condor_poll_interval: Duration,
    delete_timeout: Duration,
    delete_poll_interval: Duration,
) -> Result<(), TerminatorError> {
    if server.status == ServerStatus::Active {
        let session = match ssh::connect_ssh(
            server,
            ssh_params.port,
            ssh_params.user,
            ssh_params.private_key_path,
            ssh_params.trusted_pubkeys,
        ) {
            Ok(session) => session,
            Err(RemoteCommandError::NoSSHAccess(name)) => {
                warn!(server = %name, "no reachable SSH address, skipping removal this cycle");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        condor::condor_graceful_shutdown(&session, condor_timeout, condor_poll_interval)?;
    }

    delete_and_wait(server, cloud, delete_timeout, delete_poll_interval)
}

/// Deletes `server` with no SSH interaction. Used when `graceful=false`,
/// the server is already `ERROR`, or it is unreachable over the configured
/// network.
#[instrument(skip(cloud), fields(server = %server.name))]
pub fn brutally_terminate(
    server: &Server,
    cloud: &dyn CloudClient,
    delete_timeout: Duration,
    delete_poll_interval: Duration,
) -> Result<(), TerminatorError> {
    delete_and_wait(server, cloud, delete_timeout, delete_poll_interval)
}

#[instrument(skip(cloud), fields(server = %server.name))]
pub fn delete_and_wait(
    server: &Server,
    cloud: &dyn CloudClient,
    timeout: Duration,
    interval: Duration,
) -> Result<(), TerminatorError> {
    cloud.delete_server(server)?;

    let deadline = Instant::now() + timeout;
    loop {
        if cloud.find_server(&server.id)?.is_none() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(TerminatorError::DeleteTimeout(server.name.clone()));
        }
        thread::sleep(interval.min(deadline.saturating_duration_since(Instant::now())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MockCloudClient;
    use std::collections::HashMap;

    fn server(status: ServerStatus) -> Server {
        Server {
            id: "abc".into(),
            name: "vgcnbwc-compute-0000".into(),
            status,
            image_id: Some("img-1".into()),
            addresses: HashMap::new(),
            networks: vec!["galaxy-net".into()],
        }
    }

    #[test]
    fn brutal_termination_deletes_then_confirms_gone() {
        let s = server(ServerStatus::Error);
        let mut cloud = MockCloudClient::new();
        cloud.expect_delete_server().returning(|_| Ok(()));
        cloud.expect_find_server().returning(|_| Ok(None));

        brutally_terminate(&s, &cloud, Duration::from_secs(5), Duration::from_millis(1))
            .expect("should succeed");
    }

    #[test]
    fn delete_times_out_if_server_never_disappears() {
        let s = server(ServerStatus::Error);
        let mut cloud = MockCloudClient::new();
        cloud.expect_delete_server().returning(|_| Ok(()));
        cloud
            .expect_find_server()
            .returning(move |_| Ok(Some(server(ServerStatus::Error))));

        let err = delete_and_wait(&s, &cloud, Duration::from_millis(5), Duration::from_millis(1))
            .expect_err("should time out");
        assert!(matches!(err, TerminatorError::DeleteTimeout(_)));
    }
}
