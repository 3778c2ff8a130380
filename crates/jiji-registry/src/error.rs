//! Error types for the service registry.

use thiserror::Error;

use jiji_core::ValidationError;
use jiji_remote::{HostFailure, RemoteError};

use crate::rows::RowParseError;
use crate::sql::BindError;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur while talking to the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Parse(#[from] RowParseError),

    #[error("no hosts available to reach the registry")]
    NoHosts,

    #[error("registry unreachable on every host: {}", join(.failures))]
    Unavailable { failures: Vec<HostFailure> },
}

fn join(failures: &[HostFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
