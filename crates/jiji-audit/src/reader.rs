//! Cross-host audit reader.
//!
//! Each host returns the tail of its own log. The tail is taken by reversing
//! the file and stopping after `N` entry lines, so comments, blank lines,
//! and details lines never eat into the count. Entries from every host are
//! merged and ordered by their timestamps, which is only as accurate as the
//! hosts' clocks: this is not a causal order.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use jiji_core::JijiConfig;
use jiji_remote::{HostFailure, RemoteCommand, RemoteShell, fanout_shells, shell_quote};

use crate::entry::{AuditEntry, AuditStatus, is_details_line};
use crate::error::{AuditError, AuditResult};

/// POSIX ERE for an entry line, used by the remote tail to count entries.
/// Interval expressions are avoided for older awks.
const ENTRY_LINE_ERE: &str = r"^\[[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T[0-9:.+Z-]*] \[[A-Za-z]+ *] .+ - ";

/// Which entries to return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    /// Keep only the newest `limit` entries overall.
    pub limit: Option<usize>,
    pub status: Option<AuditStatus>,
    /// Exact action name, e.g. `lock acquire`.
    pub action: Option<String>,
}

impl AuditQuery {
    pub fn last(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        self.status.is_none_or(|s| s == entry.status)
            && self.action.as_deref().is_none_or(|a| a == entry.action)
    }

    fn is_filtered(&self) -> bool {
        self.status.is_some() || self.action.is_some()
    }
}

/// Entries parsed from one host's log.
#[derive(Debug, Clone, Default)]
pub struct HostLog {
    pub entries: Vec<AuditEntry>,
    /// Lines that were neither entries, details, comments, nor blank.
    pub skipped: usize,
}

/// Merged view over every host.
#[derive(Debug, Default, Serialize)]
pub struct AuditLog {
    pub entries: Vec<AuditEntry>,
    pub skipped: usize,
    #[serde(skip)]
    pub host_errors: Vec<HostFailure<AuditError>>,
}

pub struct AuditReader {
    path: String,
    concurrency: usize,
}

impl AuditReader {
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

    /// Read the tail of one host's log. A missing log is empty.
    pub async fn read_host(&self, shell: &dyn RemoteShell, tail: Option<usize>) -> AuditResult<HostLog> {
        let out = shell.run(&RemoteCommand::shell(self.read_script(tail))).await?;
        let log = match tail {
            // Reversed output; restore file order before parsing.
            Some(_) => {
                let lines: Vec<&str> = out.stdout.lines().rev().collect();
                parse_log(shell.host(), lines)
            }
            None => parse_log(shell.host(), out.stdout.lines().collect()),
        };
        debug!(host = %shell.host(), entries = log.entries.len(), skipped = log.skipped, "audit log read");
        Ok(log)
    }

    /// Read every host and merge by timestamp.
    pub async fn read_all(&self, shells: &[Arc<dyn RemoteShell>], query: &AuditQuery) -> AuditLog {
        // Filtering happens here, so a filtered query has to see whole logs
        // to still return `limit` matches.
        let tail = if query.is_filtered() { None } else { query.limit };
        let reads = fanout_shells(shells, self.concurrency, |shell| async move {
            self.read_host(shell.as_ref(), tail).await
        })
        .await;

        let mut merged = AuditLog::default();
        for success in reads.results {
            merged.skipped += success.value.skipped;
            merged
                .entries
                .extend(success.value.entries.into_iter().filter(|e| query.matches(e)));
        }
        for failure in &reads.host_errors {
            warn!(host = %failure.host, error = %failure.error, "could not read audit log");
        }
        merged.host_errors = reads.host_errors;

        // Stable: entries with equal timestamps keep host order.
        merged.entries.sort_by_key(|e| e.timestamp);
        if let Some(limit) = query.limit {
            let excess = merged.entries.len().saturating_sub(limit);
            merged.entries.drain(..excess);
        }
        merged
    }

    fn read_script(&self, tail: Option<usize>) -> String {
        let path = shell_quote(&self.path);
        match tail {
            None => format!("if [ -f {path} ]; then cat {path}; fi"),
            Some(n) => format!(
                "if [ -f {path} ]; then \
                 {{ tac {path} 2>/dev/null || tail -r {path} 2>/dev/null; }} | \
                 awk -v n={n} 'n <= 0 {{ exit }} {{ print }} /{ENTRY_LINE_ERE}/ {{ if (++c >= n) exit }}'; \
                 fi"
            ),
        }
    }
}

/// Parse log lines in file order.
fn parse_log(host: &str, lines: Vec<&str>) -> HostLog {
    let mut log = HostLog::default();
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if is_details_line(line) {
            match log.entries.last_mut() {
                Some(entry) => {
                    if let Err(error) = entry.parse_details(line) {
                        debug!(%host, %error, "dropping unparsable details");
                        log.skipped += 1;
                    }
                }
                // Details of an entry cut off by the tail.
                None => log.skipped += 1,
            }
            continue;
        }
        match AuditEntry::parse_line(line) {
            Ok(mut entry) => {
                entry.host = Some(host.to_string());
                log.entries.push(entry);
            }
            Err(error) => {
                debug!(%host, %error, "skipping audit line");
                log.skipped += 1;
            }
        }
    }
    log
}
