//! jiji-audit: per-host audit trail.
//!
//! Writers append one line per entry to `<state_dir>/<project>/audit.log` on
//! every targeted host. Readers tail each host's log and merge the entries
//! by timestamp.

pub mod entry;
pub mod error;
pub mod logger;
pub mod reader;

pub use entry::{AuditEntry, AuditStatus};
pub use error::{AuditError, AuditResult, EntryParseError};
pub use logger::AuditLogger;
pub use reader::{AuditLog, AuditQuery, AuditReader, HostLog};
