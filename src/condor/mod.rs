//! HTCondor Controller (§4.4): drive a single node through
//! drain/status/off using the Remote Command Runner.

use std::time::{Duration, Instant};

use ssh2::Session;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::ssh::{self, RemoteCommandError};

#[derive(Error, Debug)]
pub enum CondorError {
    #[error(transparent)]
    RemoteCommand(#[from] RemoteCommandError),

    #[error("unexpected condor_drain output: stdout=`{stdout}` stderr=`{stderr}`")]
    UnexpectedCondorOutput { stdout: String, stderr: String },

    #[error("condor shutdown did not complete within {0:?}")]
    CondorShutdownTimeout(Duration),
}

const HOSTNAME_CMD: &str = "hostname -f";

fn command_on_self(verb: &str) -> String {
    format!("{verb} `{HOSTNAME_CMD}`")
}

/// Runs `condor_drain` on the node itself. Accepted outcomes: stdout
/// contains "Sent request to drain", stderr contains "Draining already in
/// progress", or stderr contains "Can't find address" (node already gone —
/// treated as benign per §9's open question).
#[instrument(skip(session))]
pub fn condor_drain(session: &Session) -> Result<(), CondorError> {
    let command = command_on_self("condor_drain");

    // `condor_drain` routinely exits non-zero for the "already draining" /
    // "node already gone" cases, so stdout/stderr are classified even when
    // `ssh::run` reports a non-zero exit, rather than treating that exit
    // status alone as fatal.
    let (stdout, stderr) = match ssh::run(session, &command) {
        Ok(output) => (output.stdout, output.stderr),
        Err(RemoteCommandError::NonZeroExit { stdout, stderr, .. }) => (stdout, stderr),
        Err(err) => return Err(err.into()),
    };

    if stdout.contains("Sent request to drain")
        || stderr.contains("Draining already in progress")
        || stderr.contains("Can't find address")
    {
        Ok(())
    } else {
        Err(CondorError::UnexpectedCondorOutput { stdout, stderr })
    }
}

/// `true` iff the node still has more than one active slot (implying
/// claimed work still running).
#[instrument(skip(session))]
pub fn condor_active(session: &Session) -> Result<bool, CondorError> {
    let command = format!("condor_status | grep slot.*@`{HOSTNAME_CMD}`");
    let output = match ssh::run(session, &command) {
        Ok(output) => output,
        // grep with no matches exits 1; treat that as "no slots", not an error.
        Err(RemoteCommandError::NonZeroExit { exit_code: 1, .. }) => {
            return Ok(false);
        }
        Err(err) => return Err(err.into()),
    };

    let slot_count = output
        .stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .count();

    Ok(slot_count > 1)
}

/// Runs `condor_off -graceful` on the node itself; output is ignored.
#[instrument(skip(session))]
pub fn condor_off(session: &Session) -> Result<(), CondorError> {
    let command = format!("/usr/sbin/condor_off -graceful `{HOSTNAME_CMD}`");
    match ssh::run(session, &command) {
        Ok(_) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Loop: drain, check activity, sleep, repeat until inactive or `timeout`
/// elapses. On success, issues `condor_off`.
#[instrument(skip(session))]
pub fn condor_graceful_shutdown(
    session: &Session,
    timeout: Duration,
    interval: Duration,
) -> Result<(), CondorError> {
    let deadline = Instant::now() + timeout;

    loop {
        let iteration_start = Instant::now();
        condor_drain(session)?;

        if !condor_active(session)? {
            debug!("node drained, issuing condor_off");
            condor_off(session)?;
            return Ok(());
        }

        if Instant::now() >= deadline {
            return Err(CondorError::CondorShutdownTimeout(timeout));
        }

        let elapsed = iteration_start.elapsed();
        let sleep_for = interval.saturating_sub(elapsed);
        std::thread::sleep(sleep_for.min(deadline.saturating_duration_since(Instant::now())));

        if Instant::now() >= deadline {
            return Err(CondorError::CondorShutdownTimeout(timeout));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_on_self_wraps_hostname() {
        assert_eq!(command_on_self("condor_drain"), "condor_drain `hostname -f`");
    }
}
