use thiserror::Error;

use jiji_remote::RemoteError;

pub type AuditResult<T> = Result<T, AuditError>;

/// A line did not match `[TIMESTAMP] [STATUS] ACTION - MESSAGE`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unparsable audit line: {reason} ({line:?})")]
pub struct EntryParseError {
    pub line: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Parse(#[from] EntryParseError),
}
