//! Remote Command Runner (§4.3): SSH-based command execution with
//! concurrent stdout/stderr draining, exit-code capture, and a host-key
//! policy restricted to an explicit allow-list.

use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

use ssh2::Session;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::cloud::Server;

#[derive(Error, Debug)]
pub enum RemoteCommandError {
    #[error("command `{command}` exited {exit_code}: stdout=`{stdout}` stderr=`{stderr}`")]
    NonZeroExit {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("ssh session error: `{0}`")]
    Ssh(#[from] ssh2::Error),

    #[error("io error talking to remote host: `{0}`")]
    Io(#[from] std::io::Error),

    #[error("no reachable SSH address for server `{0}`")]
    NoSSHAccess(String),

    #[error("host key for `{host}` is not in the trusted pubkeys list")]
    UntrustedHostKey { host: String },
}

pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Iterates a server's addresses in stable order, attempting a TCP+SSH
/// handshake on each; the first address to succeed wins. Mirrors
/// `get_ssh_access_address` in the original implementation.
#[instrument(skip(private_key_path, trusted_pubkeys), fields(server = %server.name))]
pub fn connect_ssh(
    server: &Server,
    port: u16,
    user: &str,
    private_key_path: &std::path::Path,
    trusted_pubkeys: &[String],
) -> Result<Session, RemoteCommandError> {
    let mut addresses: Vec<&String> = server.addresses.values().flatten().collect();
    addresses.sort();

    for ip in addresses {
        match try_connect(ip, port, user, private_key_path, trusted_pubkeys) {
            Ok(session) => return Ok(session),
            Err(err) => {
                warn!(address = %ip, error_msg = %err, "SSH attempt failed, trying next address");
            }
        }
    }

    Err(RemoteCommandError::NoSSHAccess(server.name.clone()))
}

fn try_connect(
    ip: &str,
    port: u16,
    user: &str,
    private_key_path: &std::path::Path,
    trusted_pubkeys: &[String],
) -> Result<Session, RemoteCommandError> {
    let addr = format!("{ip}:{port}")
        .parse()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad address"))?;
    let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;

    verify_host_key(&session, ip, trusted_pubkeys)?;

    session.userauth_pubkey_file(user, None, private_key_path, None)?;
    Ok(session)
}

/// Accepts a connection only when the host's public key appears in
/// `trusted_pubkeys`; any other key aborts the connection (§9).
fn verify_host_key(
    session: &Session,
    host: &str,
    trusted_pubkeys: &[String],
) -> Result<(), RemoteCommandError> {
    let (key, _key_type) = session
        .host_key()
        .ok_or_else(|| RemoteCommandError::UntrustedHostKey {
            host: host.to_string(),
        })?;
    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, key);
    if trusted_pubkeys.iter().any(|k| k.contains(&encoded)) {
        Ok(())
    } else {
        Err(RemoteCommandError::UntrustedHostKey {
            host: host.to_string(),
        })
    }
}

/// Runs `command` over an already-authenticated session, draining stdout
/// and stderr in the same poll loop so that neither can fill its transport
/// buffer and block the other (§5). A command whose stderr fills up while
/// we're still blocked reading a never-ending stdout (or vice versa) would
/// otherwise deadlock, as the original implementation's comments on
/// `print_streams` call out. Fails with `NonZeroExit` when the remote exit
/// status is non-zero.
#[instrument(skip(session), fields(command = %command))]
pub fn run(session: &Session, command: &str) -> Result<CommandOutput, RemoteCommandError> {
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    session.set_blocking(false);
    let (stdout, stderr) = drain_concurrently(&mut channel)?;
    session.set_blocking(true);

    channel.wait_close()?;
    let exit_code = channel.exit_status()?;

    debug!(exit_code, stdout_len = stdout.len(), stderr_len = stderr.len(), "remote command finished");

    if exit_code != 0 {
        return Err(RemoteCommandError::NonZeroExit {
            command: command.to_string(),
            exit_code,
            stdout,
            stderr,
        });
    }

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code,
    })
}

/// Reads stdout and the stderr extended-data stream in the same poll loop,
/// on a channel already switched to non-blocking mode, so a command that
/// fills one stream's buffer while the other sits idle never stalls either
/// read.
fn drain_concurrently(
    channel: &mut ssh2::Channel,
) -> Result<(String, String), RemoteCommandError> {
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut buf = [0u8; 4096];

    loop {
        let mut made_progress = false;

        match channel.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                stdout.push_str(&String::from_utf8_lossy(&buf[..n]));
                made_progress = true;
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => return Err(err.into()),
        }

        match channel.stderr().read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                stderr.push_str(&String::from_utf8_lossy(&buf[..n]));
                made_progress = true;
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => return Err(err.into()),
        }

        if channel.eof() && !made_progress {
            break;
        }
        if !made_progress {
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    Ok((stdout, stderr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untrusted_key_error_names_the_host() {
        let err = RemoteCommandError::UntrustedHostKey {
            host: "10.0.0.5".into(),
        };
        assert!(err.to_string().contains("10.0.0.5"));
    }
}
