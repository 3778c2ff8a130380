//! Audit entries and their on-disk line format.
//!
//! ```text
//! [2025-03-01T12:00:00.000Z] [STARTED] lock acquire - deploy v2
//!     Details: {"hosts":["h1","h2"]}
//! ```
//!
//! The status column is padded to a fixed width so logs line up when read
//! with plain tools. The details line is optional.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::EntryParseError;

/// Width of the status column.
const STATUS_WIDTH: usize = 7;

/// Prefix of the optional details line.
pub const DETAILS_PREFIX: &str = "    Details: ";

static ENTRY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[([^\]]+)\] \[([A-Za-z]+) *\] (.+?) - (.*)$").expect("audit line pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Started,
    Success,
    Failed,
    Warning,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Started => "started",
            AuditStatus::Success => "success",
            AuditStatus::Failed => "failed",
            AuditStatus::Warning => "warning",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "started" => Ok(AuditStatus::Started),
            "success" => Ok(AuditStatus::Success),
            "failed" | "failure" => Ok(AuditStatus::Failed),
            "warning" | "warn" => Ok(AuditStatus::Warning),
            other => Err(format!("unknown audit status {other:?}")),
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub status: AuditStatus,
    pub action: String,
    pub message: String,
    /// Host whose log the entry was read from. Unset on entries being written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl AuditEntry {
    /// A new entry stamped with the current time.
    pub fn new(status: AuditStatus, action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status,
            action: action.into(),
            message: message.into(),
            host: None,
            details: BTreeMap::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// The entry as written to the log, details line included. Newlines in
    /// the message are flattened so one entry never spans extra lines.
    pub fn format_line(&self) -> String {
        let status = self.status.as_str().to_ascii_uppercase();
        let mut line = format!(
            "[{}] [{:<width$}] {} - {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            status,
            escape_action(&single_line(&self.action)),
            single_line(&self.message),
            width = STATUS_WIDTH,
        );
        if !self.details.is_empty() {
            if let Ok(json) = serde_json::to_string(&self.details) {
                line.push('\n');
                line.push_str(DETAILS_PREFIX);
                line.push_str(&json);
            }
        }
        line
    }

    /// Parse an entry line (without its details line).
    pub fn parse_line(line: &str) -> Result<Self, EntryParseError> {
        let fail = |reason: &str| EntryParseError {
            line: line.to_string(),
            reason: reason.to_string(),
        };
        let caps = ENTRY_LINE
            .captures(line.trim_end())
            .ok_or_else(|| fail("does not match entry grammar"))?;
        let timestamp = DateTime::parse_from_rfc3339(&caps[1])
            .map_err(|e| fail(&format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);
        let status = caps[2].parse::<AuditStatus>().map_err(|e| fail(&e))?;
        Ok(Self {
            timestamp,
            status,
            action: unescape_action(&caps[3]),
            message: caps[4].to_string(),
            host: None,
            details: BTreeMap::new(),
        })
    }

    /// Attach a parsed `Details:` line.
    pub fn parse_details(&mut self, line: &str) -> Result<(), EntryParseError> {
        let json = line.strip_prefix(DETAILS_PREFIX).unwrap_or(line.trim_start());
        let json = json.strip_prefix("Details:").unwrap_or(json).trim();
        self.details = serde_json::from_str(json).map_err(|e| EntryParseError {
            line: line.to_string(),
            reason: format!("bad details: {e}"),
        })?;
        Ok(())
    }
}

fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

/// ` - ` separates action from message, so it is written as ` \- ` inside
/// an action.
fn escape_action(action: &str) -> String {
    action.replace(" - ", " \\- ")
}

fn unescape_action(action: &str) -> String {
    action.replace(" \\- ", " - ")
}

pub(crate) fn is_details_line(line: &str) -> bool {
    line.trim_start().starts_with("Details:")
}
