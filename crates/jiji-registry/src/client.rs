//! Transport to the registry CLI on a remote host.
//!
//! Statements run as `<binary> query|exec --config <path> <sql>` through a
//! [`RemoteShell`]. The store replicates by gossip, so any reachable host
//! can answer; [`RegistryClient::query_any`] walks the hosts in preference
//! order and fails over on connectivity or command errors.

use std::sync::Arc;

use tracing::{debug, warn};

use jiji_core::config::RegistryConfig;
use jiji_remote::{HostFailure, RemoteCommand, RemoteShell};

use crate::error::{RegistryError, RegistryResult};
use crate::rows::{FromRow, parse_rows};
use crate::sql::Statement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Query,
    Exec,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Mode::Query => "query",
            Mode::Exec => "exec",
        }
    }
}

/// Runs registry statements on hosts.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    binary: String,
    config_path: String,
}

impl RegistryClient {
    pub fn new(binary: impl Into<String>, config_path: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            config_path: config_path.into(),
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(&config.binary, &config.config_path)
    }

    fn command(&self, mode: Mode, sql: String) -> RemoteCommand {
        RemoteCommand::new(&self.binary).args([
            mode.as_str().to_string(),
            "--config".to_string(),
            self.config_path.clone(),
            sql,
        ])
    }

    /// Run a read on one host and parse its rows.
    pub async fn query<T: FromRow>(
        &self,
        shell: &dyn RemoteShell,
        stmt: &Statement,
    ) -> RegistryResult<Vec<T>> {
        let sql = stmt.render()?;
        let out = shell.run(&self.command(Mode::Query, sql)).await?;
        Ok(parse_rows(&out.stdout)?)
    }

    /// Run a write on one host.
    pub async fn exec(&self, shell: &dyn RemoteShell, stmt: &Statement) -> RegistryResult<()> {
        let sql = stmt.render()?;
        shell.run(&self.command(Mode::Exec, sql)).await?;
        debug!(host = %shell.host(), statement = %stmt, "registry write applied");
        Ok(())
    }

    /// Read from the first host that answers.
    pub async fn query_any<T: FromRow>(
        &self,
        shells: &[Arc<dyn RemoteShell>],
        stmt: &Statement,
    ) -> RegistryResult<Vec<T>> {
        let sql = stmt.render()?;
        let cmd = self.command(Mode::Query, sql);
        let (host, out) = self.first_answer(shells, &cmd).await?;
        debug!(%host, statement = %stmt, "registry read");
        Ok(parse_rows(&out)?)
    }

    /// Write through the first host that accepts the statement, returning
    /// that host. Writes are upserts or deletes keyed by id, so repeating one
    /// on another host after a failure is harmless.
    pub async fn exec_any(
        &self,
        shells: &[Arc<dyn RemoteShell>],
        stmt: &Statement,
    ) -> RegistryResult<Arc<dyn RemoteShell>> {
        let sql = stmt.render()?;
        let cmd = self.command(Mode::Exec, sql);
        let mut failures = Vec::new();
        for shell in shells {
            match shell.run(&cmd).await {
                Ok(_) => {
                    debug!(host = %shell.host(), statement = %stmt, "registry write applied");
                    return Ok(Arc::clone(shell));
                }
                Err(error) => {
                    warn!(host = %shell.host(), %error, "registry write failed, trying next host");
                    failures.push(HostFailure {
                        host: shell.host().to_string(),
                        error,
                    });
                }
            }
        }
        Err(unavailable(failures))
    }

    async fn first_answer(
        &self,
        shells: &[Arc<dyn RemoteShell>],
        cmd: &RemoteCommand,
    ) -> RegistryResult<(String, String)> {
        let mut failures = Vec::new();
        for shell in shells {
            match shell.run(cmd).await {
                Ok(out) => return Ok((shell.host().to_string(), out.stdout)),
                Err(error) => {
                    warn!(host = %shell.host(), %error, "registry read failed, trying next host");
                    failures.push(HostFailure {
                        host: shell.host().to_string(),
                        error,
                    });
                }
            }
        }
        Err(unavailable(failures))
    }
}

fn unavailable(failures: Vec<HostFailure>) -> RegistryError {
    if failures.is_empty() {
        RegistryError::NoHosts
    } else {
        RegistryError::Unavailable { failures }
    }
}
