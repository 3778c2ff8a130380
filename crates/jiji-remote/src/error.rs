//! Error types for remote command execution.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur while reaching a host or running a command on it.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The host could not be reached (ssh exit 255, refused, DNS, ...).
    #[error("{host}: connection failed: {message}")]
    Connect { host: String, message: String },

    /// The command ran and exited non-zero.
    #[error("{host}: `{command}` exited with {exit_code}: {stderr}")]
    Command {
        host: String,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The command did not finish in time. The remote process is terminated
    /// by the remote-side `timeout` wrapper.
    #[error("{host}: command timed out after {after:?}")]
    Timeout { host: String, after: Duration },

    #[error("{host}: failed to spawn {program}: {message}")]
    Spawn {
        host: String,
        program: String,
        message: String,
    },

    /// None of the requested hosts could be reached.
    #[error("no reachable hosts (tried: {})", .hosts.join(", "))]
    NoReachableHosts { hosts: Vec<String> },
}

impl RemoteError {
    /// The host this error concerns, if it is about a single host.
    pub fn host(&self) -> Option<&str> {
        match self {
            RemoteError::Connect { host, .. }
            | RemoteError::Command { host, .. }
            | RemoteError::Timeout { host, .. }
            | RemoteError::Spawn { host, .. } => Some(host),
            RemoteError::NoReachableHosts { .. } => None,
        }
    }

    /// Whether the failure means the host itself is unavailable, as opposed
    /// to a command that ran and failed.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            RemoteError::Connect { .. }
                | RemoteError::Timeout { .. }
                | RemoteError::Spawn { .. }
                | RemoteError::NoReachableHosts { .. }
        )
    }
}
