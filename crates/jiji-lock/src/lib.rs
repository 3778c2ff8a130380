//! jiji-lock: the deploy lock.
//!
//! A lock is a JSON record in a per-project file on each targeted host.
//! "Locked" is derived: true iff any targeted host's record is locked.
//!
//! # Protocol
//!
//! ```text
//! acquire(message, hosts, force)
//!   ├── status(hosts)          abort on any locked host unless force
//!   ├── fanout: exclusive create (set -C) / overwrite when force
//!   └── any failure → release hosts written by this call, report
//! release(hosts)               best effort, idempotent, never errors
//! status(hosts)                unreadable/corrupt → unlocked (fail-open)
//! cleanup_stale_locks(hosts)   release locks whose local pid is gone
//! ```

pub mod error;
pub mod lock;
pub mod process;
pub mod record;

pub use error::{LockConflict, LockError, LockResult};
pub use lock::{
    CleanupReport, DistributedLock, HostLockStatus, LockAcquisition, LockDetails, LockState,
    LockStatus, ReleaseOutcome, ReleaseReport,
};
pub use record::{LockIdentity, LockRecord, LockRecordError};
