//! The `RemoteShell` contract and the local implementation.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::command::{CommandOutput, RemoteCommand};
use crate::error::{RemoteError, RemoteResult};

/// Executes commands on one host.
///
/// Implementations own a single connection and serialize command
/// submission on it. `execute` reports a non-zero exit as a normal
/// `CommandOutput`; `run` turns it into `RemoteError::Command`.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// The host name this shell is connected to.
    fn host(&self) -> &str;

    async fn execute(&self, command: &RemoteCommand) -> RemoteResult<CommandOutput>;

    /// Execute and require a zero exit code.
    async fn run(&self, command: &RemoteCommand) -> RemoteResult<CommandOutput> {
        let output = self.execute(command).await?;
        output.check(self.host(), command)
    }

    /// Release the underlying connection.
    async fn close(&self) {}
}

/// Hosts that are served by [`LocalShell`] instead of SSH.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

/// Runs commands on the local machine, optionally inside a working
/// directory. Used for `localhost` targets and as a stand-in host in tests.
#[derive(Debug, Clone)]
pub struct LocalShell {
    host: String,
    working_dir: Option<PathBuf>,
    default_timeout: Option<Duration>,
}

impl LocalShell {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            working_dir: None,
            default_timeout: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl RemoteShell for LocalShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute(&self, command: &RemoteCommand) -> RemoteResult<CommandOutput> {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(host = %self.host, command = %command, "executing locally");
        let child = cmd.spawn().map_err(|e| RemoteError::Spawn {
            host: self.host.clone(),
            program: command.program.clone(),
            message: e.to_string(),
        })?;

        let wait = child.wait_with_output();
        let output = match command.timeout.or(self.default_timeout) {
            // Dropping the future on timeout kills the child.
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| RemoteError::Timeout {
                    host: self.host.clone(),
                    after: limit,
                })?,
            None => wait.await,
        }
        .map_err(|e| RemoteError::Spawn {
            host: self.host.clone(),
            program: command.program.clone(),
            message: e.to_string(),
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
