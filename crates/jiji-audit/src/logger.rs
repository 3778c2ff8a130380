//! Fire-and-forget audit writer.
//!
//! Every targeted host gets the same entry appended to its own log. A
//! failing host is logged as a warning and never holds up the others or
//! the caller: the audit trail is telemetry, not a correctness mechanism.

use std::sync::Arc;

use tracing::{debug, warn};

use jiji_core::JijiConfig;
use jiji_remote::{FanoutResult, RemoteCommand, RemoteShell, fanout_shells, shell_quote};

use crate::entry::{AuditEntry, AuditStatus};

pub struct AuditLogger {
    path: String,
    concurrency: usize,
}

impl AuditLogger {
    pub fn new(config: &JijiConfig) -> Self {
        Self::at_path(config.audit_log_path()).with_concurrency(config.ssh.command_concurrency)
    }

    pub fn at_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            concurrency: 30,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Append `entry` on every host. Per-host outcomes are returned for
    /// callers that care; failures have already been logged.
    pub async fn log(&self, shells: &[Arc<dyn RemoteShell>], entry: &AuditEntry) -> FanoutResult<()> {
        let script = self.append_script(&entry.format_line());
        let result = fanout_shells(shells, self.concurrency, |shell| {
            let cmd = RemoteCommand::shell(script.clone());
            async move { shell.run(&cmd).await.map(|_| ()) }
        })
        .await;

        for failure in &result.host_errors {
            warn!(host = %failure.host, error = %failure.error, action = %entry.action, "audit write failed");
        }
        debug!(
            action = %entry.action,
            status = %entry.status,
            hosts = result.results.len(),
            "audit entry written"
        );
        result
    }

    pub async fn log_started(&self, shells: &[Arc<dyn RemoteShell>], action: &str, message: &str) {
        self.log(shells, &AuditEntry::new(AuditStatus::Started, action, message)).await;
    }

    pub async fn log_success(&self, shells: &[Arc<dyn RemoteShell>], action: &str, message: &str) {
        self.log(shells, &AuditEntry::new(AuditStatus::Success, action, message)).await;
    }

    pub async fn log_failure(&self, shells: &[Arc<dyn RemoteShell>], action: &str, message: &str) {
        self.log(shells, &AuditEntry::new(AuditStatus::Failed, action, message)).await;
    }

    pub async fn log_warning(&self, shells: &[Arc<dyn RemoteShell>], action: &str, message: &str) {
        self.log(shells, &AuditEntry::new(AuditStatus::Warning, action, message)).await;
    }

    fn append_script(&self, text: &str) -> String {
        let path = shell_quote(&self.path);
        let dir = shell_quote(self.path.rsplit_once('/').map(|(d, _)| d).unwrap_or("."));
        format!("mkdir -p {dir} && printf '%s\\n' {} >> {path}", shell_quote(text))
    }
}
