//! SSH shell built on the system OpenSSH client.
//!
//! Each `SshShell` owns one multiplexed master connection (ControlMaster)
//! so repeated commands reuse the authenticated session. Command
//! submission is serialized per connection.
//!
//! Timeouts are enforced on both ends: the remote command is wrapped in
//! `timeout -k` so the remote process is killed when the deadline passes,
//! and the local `ssh` child is killed when the local wait is abandoned.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use jiji_core::config::SshConfig;

use crate::command::{CommandOutput, RemoteCommand, shell_quote};
use crate::error::{RemoteError, RemoteResult};
use crate::shell::RemoteShell;

/// Exit code OpenSSH uses for its own (connection) failures.
const SSH_CONNECTION_FAILURE: i32 = 255;
/// Exit code of coreutils `timeout` when the deadline passed.
const REMOTE_TIMEOUT_EXIT: i32 = 124;
/// Grace period between TERM and KILL for timed-out remote commands.
const REMOTE_KILL_AFTER_SECS: u64 = 5;

/// Connection parameters shared by every host.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    pub connect_timeout: Duration,
    pub command_timeout: Option<Duration>,
    /// How long the master connection lingers after the last command.
    pub control_persist: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self::from(&SshConfig::default())
    }
}

impl From<&SshConfig> for SshOptions {
    fn from(config: &SshConfig) -> Self {
        Self {
            user: config.user.clone(),
            port: config.port,
            identity_file: config.identity_file.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            command_timeout: config.command_timeout_secs.map(Duration::from_secs),
            control_persist: Duration::from_secs(30),
        }
    }
}

/// A multiplexed SSH connection to one host.
pub struct SshShell {
    host: String,
    options: SshOptions,
    control_path: PathBuf,
    /// Serializes command submission on this connection.
    submit: Mutex<()>,
}

impl SshShell {
    /// Create a shell whose control socket lives in `control_dir`.
    pub fn new(host: impl Into<String>, options: SshOptions, control_dir: &Path) -> Self {
        let host = host.into();
        let control_path = control_dir.join(format!("{}.sock", socket_name(&host)));
        Self {
            host,
            options,
            control_path,
            submit: Mutex::new(()),
        }
    }

    /// Open the master connection by running `true` on the host.
    pub async fn connect(&self) -> RemoteResult<()> {
        let probe = RemoteCommand::new("true").with_timeout(self.options.connect_timeout * 2);
        match self.execute(&probe).await {
            Ok(out) if out.success() => {
                debug!(host = %self.host, "ssh connection established");
                Ok(())
            }
            Ok(out) => Err(RemoteError::Connect {
                host: self.host.clone(),
                message: format!("probe exited with {}: {}", out.exit_code, out.stderr.trim()),
            }),
            Err(RemoteError::Timeout { .. }) => Err(RemoteError::Connect {
                host: self.host.clone(),
                message: "connection attempt timed out".to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.options.port.to_string(),
            "-l".to_string(),
            self.options.user.clone(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            format!("ControlPersist={}", self.options.control_persist.as_secs()),
        ];
        if let Some(identity) = &self.options.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args
    }

    /// Remote command line, wrapped so the remote side enforces the deadline.
    fn remote_command_line(command: &RemoteCommand, limit: Option<Duration>) -> String {
        let line = command.to_shell_string();
        match limit {
            Some(limit) => format!(
                "timeout -k {} {} sh -c {}",
                REMOTE_KILL_AFTER_SECS,
                limit.as_secs().max(1),
                shell_quote(&line)
            ),
            None => line,
        }
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute(&self, command: &RemoteCommand) -> RemoteResult<CommandOutput> {
        let _guard = self.submit.lock().await;
        let limit = command.timeout.or(self.options.command_timeout);

        let mut cmd = tokio::process::Command::new("ssh");
        cmd.args(self.base_args())
            .arg("--")
            .arg(&self.host)
            .arg(Self::remote_command_line(command, limit))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(host = %self.host, command = %command, "executing over ssh");
        let child = cmd.spawn().map_err(|e| RemoteError::Spawn {
            host: self.host.clone(),
            program: "ssh".to_string(),
            message: e.to_string(),
        })?;

        let wait = child.wait_with_output();
        let output = match limit {
            Some(limit) => {
                // Allow the remote TERM/KILL sequence to finish before giving up locally.
                let local = limit + Duration::from_secs(REMOTE_KILL_AFTER_SECS + 1);
                tokio::time::timeout(local, wait)
                    .await
                    .map_err(|_| RemoteError::Timeout {
                        host: self.host.clone(),
                        after: limit,
                    })?
            }
            None => wait.await,
        }
        .map_err(|e| RemoteError::Spawn {
            host: self.host.clone(),
            program: "ssh".to_string(),
            message: e.to_string(),
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if exit_code == SSH_CONNECTION_FAILURE {
            return Err(RemoteError::Connect {
                host: self.host.clone(),
                message: stderr.trim().to_string(),
            });
        }
        if let (Some(limit), REMOTE_TIMEOUT_EXIT) = (limit, exit_code) {
            return Err(RemoteError::Timeout {
                host: self.host.clone(),
                after: limit,
            });
        }

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    async fn close(&self) {
        let _guard = self.submit.lock().await;
        let result = tokio::process::Command::new("ssh")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-O")
            .arg("exit")
            .arg("--")
            .arg(&self.host)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(_) => debug!(host = %self.host, "ssh connection closed"),
            Err(e) => warn!(host = %self.host, error = %e, "failed to close ssh connection"),
        }
    }
}

/// Socket file name for a host; unix socket paths are length-limited.
fn socket_name(host: &str) -> String {
    let cleaned: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .take(48)
        .collect();
    cleaned
}
