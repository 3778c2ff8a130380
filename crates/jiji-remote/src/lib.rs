//! jiji-remote: remote execution primitives for Jiji.
//!
//! Every cluster operation is built on two pieces: a [`RemoteShell`] that
//! runs one command on one host, and [`fanout`] which dispatches the same
//! operation to many hosts and settles all of them.
//!
//! # Architecture
//!
//! ```text
//! ExecutionContext (one per CLI invocation)
//!   ├── ConnectionPool → SshShell per host (bounded, retried connects)
//!   ├── LocalShell for localhost targets
//!   ├── unreachable hosts (tolerated unless require_all_hosts)
//!   └── close() on every exit path via scoped()
//!
//! fanout([(host, op)], concurrency)
//!   └── FanoutResult { results, host_errors }  // every host in exactly one
//! ```
//!
//! Concurrency is cooperative: "parallel" means many in-flight commands
//! multiplexed on the runtime, bounded separately for connection
//! establishment and command execution.

pub mod command;
pub mod context;
pub mod error;
pub mod fanout;
pub mod mock;
pub mod pool;
pub mod retry;
pub mod shell;
pub mod ssh;

pub use command::{CommandOutput, RemoteCommand, shell_quote};
pub use context::ExecutionContext;
pub use error::{RemoteError, RemoteResult};
pub use fanout::{FanoutResult, HostFailure, HostSuccess, fanout, fanout_shells};
pub use mock::MockShell;
pub use pool::{ConnectionPool, Connections};
pub use retry::{RetryPolicy, with_retry};
pub use shell::{LocalShell, RemoteShell, is_local_host};
pub use ssh::{SshOptions, SshShell};
