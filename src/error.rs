// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::io;

/// Error type for pool operations.
#[derive(Debug)]
pub enum Error {
    /// TCP connect or SSH handshake to a host failed. Carries the host
    /// string the caller passed so fan-out errors stay attributable.
    Dial { host: String, source: Box<Error> },
    /// The server refused a new channel because its session quota is full
    /// ("administratively prohibited"). Retried with a short backoff before
    /// it ever reaches a caller.
    SessionLimit,
    /// SSH protocol error from russh.
    Ssh(russh::Error),
    /// SFTP subsystem error from russh-sftp.
    Sftp(russh_sftp::client::error::Error),
    /// Private key parse or load failure.
    KeyInvalid(russh::keys::Error),
    /// Password rejected by the server.
    PasswordWrong,
    /// Key authentication rejected by the server.
    KeyAuthFailed,
    /// Could not reach the SSH agent.
    AgentConnectionFailed,
    /// The SSH agent holds no identities.
    AgentNoIdentities,
    /// Every agent identity was rejected by the server.
    AgentAuthFailed,
    /// Host key verification failed.
    ServerCheckFailed,
    /// The remote command finished without reporting an exit status.
    CommandDidntExit,
    /// Malformed `[user@]host[:port]` target or `host:port` endpoint.
    InvalidTarget(String),
    /// Address resolution failure.
    AddressInvalid(io::Error),
    /// IO error.
    Io(io::Error),
    /// The pool has been shut down.
    PoolClosed,
    /// Command execution failure with host, command, and output context.
    Exec {
        host: String,
        command: String,
        message: String,
    },
}

impl Error {
    pub(crate) fn dial(host: &str, source: Error) -> Self {
        Error::Dial {
            host: host.to_string(),
            source: Box::new(source),
        }
    }

    pub(crate) fn exec(host: &str, command: &str, message: String) -> Self {
        Error::Exec {
            host: host.to_string(),
            command: command.to_string(),
            message,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Dial { host, source } => write!(f, "ssh dial {host:?}: {source}"),
            Error::SessionLimit => write!(f, "server session limit reached (open failed)"),
            Error::Ssh(e) => write!(f, "SSH error: {e}"),
            Error::Sftp(e) => write!(f, "SFTP error: {e:?}"),
            Error::KeyInvalid(e) => write!(f, "invalid key: {e}"),
            Error::PasswordWrong => write!(f, "wrong password"),
            Error::KeyAuthFailed => write!(f, "key authentication failed"),
            Error::AgentConnectionFailed => write!(f, "SSH agent not reachable"),
            Error::AgentNoIdentities => write!(f, "no identities available in SSH agent"),
            Error::AgentAuthFailed => write!(f, "SSH agent authentication failed"),
            Error::ServerCheckFailed => write!(f, "host key verification failed"),
            Error::CommandDidntExit => write!(f, "command exited without a status"),
            Error::InvalidTarget(target) => write!(f, "invalid target {target:?}"),
            Error::AddressInvalid(e) => write!(f, "invalid address: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::PoolClosed => write!(f, "pool is closed"),
            Error::Exec {
                host,
                command,
                message,
            } => write!(
                f,
                "error executing on host {host} command {command:?}: {message}"
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Dial { source, .. } => Some(source),
            Error::Ssh(e) => Some(e),
            Error::KeyInvalid(e) => Some(e),
            Error::AddressInvalid(e) | Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<russh::Error> for Error {
    fn from(e: russh::Error) -> Self {
        Error::Ssh(e)
    }
}

impl From<russh_sftp::client::error::Error> for Error {
    fn from(e: russh_sftp::client::error::Error) -> Self {
        Error::Sftp(e)
    }
}

impl From<russh::keys::Error> for Error {
    fn from(e: russh::keys::Error) -> Self {
        Error::KeyInvalid(e)
    }
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_error_names_the_host() {
        let err = Error::dial(
            "alice@h3:2222",
            Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
        );
        let msg = err.to_string();
        assert!(msg.contains("ssh dial"));
        assert!(msg.contains("alice@h3:2222"));
        assert!(msg.contains("refused"));
    }

    #[test]
    fn test_exec_error_names_host_and_command() {
        let err = Error::exec("h1", "ls -l", "exit status 2".to_string());
        let msg = err.to_string();
        assert!(msg.contains("h1"));
        assert!(msg.contains("\"ls -l\""));
        assert!(msg.contains("exit status 2"));
    }
}
