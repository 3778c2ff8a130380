//! jiji-core: shared types for the Jiji fleet deployment tool.
//!
//! Holds the registry data model (servers, services, containers), the
//! `jiji.toml` configuration, clock helpers, and the allow-list validators
//! applied to anything interpolated into a remote command.

pub mod config;
pub mod time;
pub mod types;
pub mod validate;

pub use config::{ConfigError, JijiConfig};
pub use types::*;
pub use validate::ValidationError;
