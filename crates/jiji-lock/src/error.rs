//! Error types for the deploy lock.

use thiserror::Error;

use jiji_remote::HostFailure;

use crate::record::LockRecord;

/// Result type alias for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// A host that already holds a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConflict {
    pub host: String,
    /// `None` when the holder's record could not be read back.
    pub record: Option<LockRecord>,
}

impl std::fmt::Display for LockConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.record {
            Some(r) => write!(f, "{} (\"{}\" by {} at {})", self.host, r.message, r.owner(), r.acquired_at),
            None => write!(f, "{} (lock file present)", self.host),
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("no target hosts")]
    NoHosts,

    /// Another holder owns the lock on at least one target host.
    #[error("deploy lock already held on {}", join(.conflicts))]
    Contention { conflicts: Vec<LockConflict> },

    /// Some lock writes failed; the hosts that were written are rolled back.
    #[error(
        "failed to lock {}; rolled back {} host(s){}",
        join(.failures),
        .rolled_back.len(),
        rollback_note(.rollback_failures)
    )]
    Partial {
        failures: Vec<HostFailure>,
        rolled_back: Vec<String>,
        rollback_failures: Vec<HostFailure>,
    },
}

impl LockError {
    /// Hosts whose state blocked or broke the acquisition.
    pub fn hosts(&self) -> Vec<String> {
        match self {
            LockError::NoHosts => Vec::new(),
            LockError::Contention { conflicts } => conflicts.iter().map(|c| c.host.clone()).collect(),
            LockError::Partial { failures, .. } => failures.iter().map(|f| f.host.clone()).collect(),
        }
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn rollback_note(failures: &[HostFailure]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!("; rollback failed on {}, release manually", join(failures))
    }
}
