//! Lock record stored as JSON in each host's lock file.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use jiji_core::time::now_iso8601;

use crate::process::{local_hostname, local_username};

/// Contents of a host's lock file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub locked: bool,
    pub message: String,
    /// ISO-8601 acquisition time on the acquiring machine's clock.
    pub acquired_at: String,
    /// User that acquired the lock.
    pub acquired_by: String,
    /// Machine the acquiring process ran on (not the locked host).
    pub host: String,
    pub pid: u32,
    /// Jiji version that wrote the record.
    pub version: String,
}

/// Who is taking a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockIdentity {
    pub user: String,
    pub host: String,
    pub pid: u32,
    pub version: String,
}

impl LockIdentity {
    /// Identity of the running process.
    pub fn current() -> Self {
        Self {
            user: local_username(),
            host: local_hostname(),
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The lock file existed but did not hold a valid record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unparsable lock record: {0}")]
pub struct LockRecordError(pub String);

impl LockRecord {
    pub fn new(message: &str, identity: &LockIdentity) -> Self {
        Self {
            locked: true,
            message: message.to_string(),
            acquired_at: now_iso8601(),
            acquired_by: identity.user.clone(),
            host: identity.host.clone(),
            pid: identity.pid,
            version: identity.version.clone(),
        }
    }

    /// Parse lock file contents. Empty content means no record.
    pub fn parse(content: &str) -> Result<Option<Self>, LockRecordError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|e| LockRecordError(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        // A struct of strings, bools, and integers always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// `user@host (pid N)`, for conflict messages.
    pub fn owner(&self) -> String {
        format!("{}@{} (pid {})", self.acquired_by, self.host, self.pid)
    }
}
