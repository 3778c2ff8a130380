//! Distributed deploy lock: one lock file per host.
//!
//! There is no cluster-wide lock object: the cluster counts as locked when
//! any targeted host's file holds a locked record. Acquisition must persist
//! on every targeted host; otherwise the hosts written by this call are
//! rolled back.
//!
//! Each host write is an exclusive create (`set -C`, i.e. `O_EXCL`), so two
//! racing acquirers cannot both win a host. The up-front status read only
//! exists to fail fast with the holder's message; it is not what provides
//! exclusion. There is still no coordinator: exclusion holds only while
//! every caller goes through `acquire`/`release` and uses `force` with care.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use jiji_core::config::JijiConfig;
use jiji_remote::{
    FanoutResult, HostFailure, HostSuccess, RemoteCommand, RemoteError, RemoteShell,
    fanout_shells, shell_quote,
};

use crate::error::{LockConflict, LockError, LockResult};
use crate::process::process_alive;
use crate::record::{LockIdentity, LockRecord, LockRecordError};

/// Exit code of the exclusive-write script when the lock file exists.
const EXIT_LOCK_EXISTS: i32 = 3;

/// Per-host lock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    Unlocked,
    Locked,
}

/// What one host reported during `status`.
#[derive(Debug, Clone, Serialize)]
pub struct HostLockStatus {
    pub host: String,
    pub state: LockState,
    pub record: Option<LockRecord>,
    /// The lock file could not be read (host down, permissions).
    pub read_error: Option<String>,
    /// The lock file existed but held garbage; treated as unlocked.
    pub parse_error: Option<String>,
}

/// Aggregate view over the targeted hosts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LockStatus {
    pub hosts: Vec<HostLockStatus>,
}

impl LockStatus {
    /// Locked iff any targeted host holds a locked record.
    pub fn is_locked(&self) -> bool {
        self.hosts.iter().any(|h| h.state == LockState::Locked)
    }

    pub fn locked_hosts(&self) -> Vec<String> {
        self.filter_hosts(LockState::Locked)
    }

    pub fn unlocked_hosts(&self) -> Vec<String> {
        self.filter_hosts(LockState::Unlocked)
    }

    pub fn host(&self, host: &str) -> Option<&HostLockStatus> {
        self.hosts.iter().find(|h| h.host == host)
    }

    fn filter_hosts(&self, state: LockState) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|h| h.state == state)
            .map(|h| h.host.clone())
            .collect()
    }

    fn conflicts(&self) -> Vec<LockConflict> {
        self.hosts
            .iter()
            .filter(|h| h.state == LockState::Locked)
            .map(|h| LockConflict {
                host: h.host.clone(),
                record: h.record.clone(),
            })
            .collect()
    }
}

/// A successful acquisition.
#[derive(Debug, Clone, Serialize)]
pub struct LockAcquisition {
    pub record: LockRecord,
    pub hosts: Vec<String>,
}

/// Outcome of deleting the lock file on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Released,
    AlreadyAbsent,
}

/// Per-host result of `release`. Release never fails as a whole.
#[derive(Debug, Clone)]
pub struct ReleaseReport {
    pub released: Vec<HostSuccess<ReleaseOutcome>>,
    pub failures: Vec<HostFailure>,
}

impl ReleaseReport {
    pub fn fully_released(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The current holder, as shown by `lock show`.
#[derive(Debug, Clone, Serialize)]
pub struct LockDetails {
    pub record: LockRecord,
    /// Hosts holding this same record.
    pub hosts: Vec<String>,
    /// Hosts locked by a different record.
    pub other_hosts: Vec<String>,
}

/// Outcome of `cleanup_stale_locks`.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// Locks whose owning process was gone and were released.
    pub released: Vec<String>,
    /// Locks whose owning process is still running.
    pub active: Vec<String>,
    /// Locks taken from another machine; their pid cannot be checked here.
    pub unverifiable: Vec<String>,
    pub failures: Vec<HostFailure>,
}

enum WriteError {
    Exists,
    Remote(RemoteError),
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteError::Exists => f.write_str("lock file already exists"),
            WriteError::Remote(e) => e.fmt(f),
        }
    }
}

type ProcessProbe = dyn Fn(u32) -> bool + Send + Sync;

/// Deploy lock over a set of hosts.
pub struct DistributedLock {
    lock_path: String,
    identity: LockIdentity,
    concurrency: usize,
    probe: Box<ProcessProbe>,
}

impl DistributedLock {
    pub fn new(config: &JijiConfig) -> Self {
        Self::at_path(config.lock_path()).with_concurrency(config.ssh.command_concurrency)
    }

    /// Lock stored at an explicit path on every host.
    pub fn at_path(lock_path: impl Into<String>) -> Self {
        Self {
            lock_path: lock_path.into(),
            identity: LockIdentity::current(),
            concurrency: 30,
            probe: Box::new(process_alive),
        }
    }

    pub fn with_identity(mut self, identity: LockIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Replace the local pid liveness check.
    pub fn with_process_probe(mut self, probe: impl Fn(u32) -> bool + Send + Sync + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn lock_path(&self) -> &str {
        &self.lock_path
    }

    pub fn identity(&self) -> &LockIdentity {
        &self.identity
    }

    // ── Acquire ────────────────────────────────────────────────────

    /// Take the lock on every host in `shells`.
    ///
    /// Without `force`, any locked host aborts before anything is written.
    /// If any write fails, the hosts this call wrote are released again.
    pub async fn acquire(
        &self,
        message: &str,
        shells: &[Arc<dyn RemoteShell>],
        force: bool,
    ) -> LockResult<LockAcquisition> {
        if shells.is_empty() {
            return Err(LockError::NoHosts);
        }

        if !force {
            let status = self.status(shells).await;
            if status.is_locked() {
                let conflicts = status.conflicts();
                warn!(hosts = ?status.locked_hosts(), "deploy lock already held");
                return Err(LockError::Contention { conflicts });
            }
        }

        let record = LockRecord::new(message, &self.identity);
        let json = record.to_json();
        let writes: FanoutResult<(), WriteError> =
            fanout_shells(shells, self.concurrency, |shell| {
                let script = if force {
                    self.overwrite_script(&json)
                } else {
                    self.exclusive_write_script(&json)
                };
                async move { write_lock(shell.as_ref(), script).await }
            })
            .await;

        if writes.all_succeeded() {
            let hosts = writes.succeeded_hosts();
            info!(hosts = ?hosts, %message, force, "deploy lock acquired");
            return Ok(LockAcquisition { record, hosts });
        }

        // Roll back only what this call wrote.
        let written = writes.succeeded_hosts();
        let to_rollback: Vec<Arc<dyn RemoteShell>> = shells
            .iter()
            .filter(|s| written.iter().any(|h| h == s.host()))
            .cloned()
            .collect();
        let rollback = self.release(&to_rollback).await;
        let rolled_back: Vec<String> = rollback.released.iter().map(|r| r.host.clone()).collect();
        if !rollback.fully_released() {
            warn!(hosts = ?rollback.failures.iter().map(|f| &f.host).collect::<Vec<_>>(), "lock rollback incomplete");
        }

        let lost_race: Vec<&str> = writes
            .host_errors
            .iter()
            .filter(|f| matches!(f.error, WriteError::Exists))
            .map(|f| f.host.as_str())
            .collect();

        if !lost_race.is_empty() {
            let holders: Vec<Arc<dyn RemoteShell>> = shells
                .iter()
                .filter(|s| lost_race.contains(&s.host()))
                .cloned()
                .collect();
            let status = self.status(&holders).await;
            let conflicts = lost_race
                .iter()
                .map(|host| LockConflict {
                    host: host.to_string(),
                    record: status.host(host).and_then(|h| h.record.clone()),
                })
                .collect();
            warn!(hosts = ?lost_race, "lost lock race to a concurrent acquirer");
            return Err(LockError::Contention { conflicts });
        }

        let failures: Vec<HostFailure> = writes
            .host_errors
            .into_iter()
            .filter_map(|f| match f.error {
                WriteError::Remote(error) => Some(HostFailure { host: f.host, error }),
                WriteError::Exists => None,
            })
            .collect();
        warn!(failed = failures.len(), rolled_back = rolled_back.len(), "deploy lock acquisition failed");
        Err(LockError::Partial {
            failures,
            rolled_back,
            rollback_failures: rollback.failures,
        })
    }

    // ── Release ────────────────────────────────────────────────────

    /// Delete the lock file on every host. Per-host failures are reported,
    /// never raised; releasing an absent lock succeeds.
    pub async fn release(&self, shells: &[Arc<dyn RemoteShell>]) -> ReleaseReport {
        let script = self.delete_script();
        let result = fanout_shells(shells, self.concurrency, |shell| {
            let cmd = RemoteCommand::shell(script.clone());
            async move {
                let out = shell.run(&cmd).await?;
                Ok::<_, RemoteError>(if out.stdout.trim() == "removed" {
                    ReleaseOutcome::Released
                } else {
                    ReleaseOutcome::AlreadyAbsent
                })
            }
        })
        .await;

        for failure in &result.host_errors {
            warn!(host = %failure.host, error = %failure.error, "failed to release lock");
        }
        info!(
            released = result.results.len(),
            failed = result.host_errors.len(),
            "deploy lock released"
        );
        ReleaseReport {
            released: result.results,
            failures: result.host_errors,
        }
    }

    // ── Status ─────────────────────────────────────────────────────

    /// Read every host's record. Unreadable or unparsable files count as
    /// unlocked; the reason is kept on the host entry.
    pub async fn status(&self, shells: &[Arc<dyn RemoteShell>]) -> LockStatus {
        let script = self.read_script();
        let reads = fanout_shells(shells, self.concurrency, |shell| {
            let cmd = RemoteCommand::shell(script.clone());
            async move { shell.run(&cmd).await.map(|out| out.stdout) }
        })
        .await;

        let mut hosts = Vec::with_capacity(reads.len());
        for HostSuccess { host, value } in reads.results {
            hosts.push(host_status(host, &value));
        }
        for HostFailure { host, error } in reads.host_errors {
            warn!(%host, %error, "could not read lock file, treating as unlocked");
            hosts.push(HostLockStatus {
                host,
                state: LockState::Unlocked,
                record: None,
                read_error: Some(error.to_string()),
                parse_error: None,
            });
        }
        // Restore the caller's host order.
        hosts.sort_by_key(|h| shells.iter().position(|s| s.host() == h.host));
        LockStatus { hosts }
    }

    /// The first locked record, with every host holding that same record.
    pub async fn show(&self, shells: &[Arc<dyn RemoteShell>]) -> Option<LockDetails> {
        let status = self.status(shells).await;
        let record = status
            .hosts
            .iter()
            .find(|h| h.state == LockState::Locked)
            .and_then(|h| h.record.clone())?;

        let (same, other): (Vec<_>, Vec<_>) = status
            .hosts
            .iter()
            .filter(|h| h.state == LockState::Locked)
            .partition(|h| h.record.as_ref() == Some(&record));
        Some(LockDetails {
            record,
            hosts: same.into_iter().map(|h| h.host.clone()).collect(),
            other_hosts: other.into_iter().map(|h| h.host.clone()).collect(),
        })
    }

    // ── Stale lock cleanup ─────────────────────────────────────────

    /// Release locks whose owning process has exited.
    ///
    /// A pid is only meaningful on the machine that took the lock, so only
    /// records stamped with this machine's hostname are checked.
    pub async fn cleanup_stale_locks(&self, shells: &[Arc<dyn RemoteShell>]) -> CleanupReport {
        let status = self.status(shells).await;
        let mut report = CleanupReport::default();
        let mut stale = Vec::new();

        for entry in &status.hosts {
            let Some(record) = entry.record.as_ref().filter(|r| r.locked) else {
                continue;
            };
            if record.host != self.identity.host {
                debug!(host = %entry.host, owner = %record.owner(), "lock owned by another machine");
                report.unverifiable.push(entry.host.clone());
            } else if (self.probe)(record.pid) {
                report.active.push(entry.host.clone());
            } else {
                info!(host = %entry.host, pid = record.pid, "lock owner exited, releasing stale lock");
                stale.push(entry.host.clone());
            }
        }

        if !stale.is_empty() {
            let targets: Vec<Arc<dyn RemoteShell>> = shells
                .iter()
                .filter(|s| stale.iter().any(|h| h == s.host()))
                .cloned()
                .collect();
            let released = self.release(&targets).await;
            report.released = released.released.into_iter().map(|r| r.host).collect();
            report.failures = released.failures;
        }
        report
    }

    // ── Scripts ────────────────────────────────────────────────────

    fn lock_dir(&self) -> &str {
        self.lock_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(".")
    }

    fn read_script(&self) -> String {
        let path = shell_quote(&self.lock_path);
        format!("if [ -e {path} ]; then cat {path}; fi")
    }

    /// Create the lock file only if absent; exits 3 when it already exists.
    fn exclusive_write_script(&self, json: &str) -> String {
        let dir = shell_quote(self.lock_dir());
        let path = shell_quote(&self.lock_path);
        let body = shell_quote(json);
        format!(
            "mkdir -p {dir} || exit 1\n\
             if ( set -C; printf '%s\\n' {body} > {path} ) 2>/dev/null; then exit 0; fi\n\
             if [ -e {path} ]; then exit {EXIT_LOCK_EXISTS}; fi\n\
             exit 1"
        )
    }

    /// Replace the lock file atomically, regardless of its current contents.
    fn overwrite_script(&self, json: &str) -> String {
        let dir = shell_quote(self.lock_dir());
        let path = shell_quote(&self.lock_path);
        let tmp = shell_quote(&format!("{}.tmp", self.lock_path));
        let body = shell_quote(json);
        format!("mkdir -p {dir} && printf '%s\\n' {body} > {tmp}.$$ && mv -f {tmp}.$$ {path}")
    }

    fn delete_script(&self) -> String {
        let path = shell_quote(&self.lock_path);
        format!("if [ -e {path} ]; then rm -f {path} && echo removed; else echo absent; fi")
    }
}

async fn write_lock(shell: &dyn RemoteShell, script: String) -> Result<(), WriteError> {
    let cmd = RemoteCommand::shell(script);
    match shell.execute(&cmd).await {
        Ok(out) if out.exit_code == EXIT_LOCK_EXISTS => Err(WriteError::Exists),
        Ok(out) => out.check(shell.host(), &cmd).map(|_| ()).map_err(WriteError::Remote),
        Err(e) => Err(WriteError::Remote(e)),
    }
}

fn host_status(host: String, content: &str) -> HostLockStatus {
    match LockRecord::parse(content) {
        Ok(Some(record)) => HostLockStatus {
            host,
            state: if record.locked { LockState::Locked } else { LockState::Unlocked },
            record: Some(record),
            read_error: None,
            parse_error: None,
        },
        Ok(None) => HostLockStatus {
            host,
            state: LockState::Unlocked,
            record: None,
            read_error: None,
            parse_error: None,
        },
        Err(LockRecordError(reason)) => {
            warn!(%host, %reason, "corrupt lock file, treating as unlocked");
            HostLockStatus {
                host,
                state: LockState::Unlocked,
                record: None,
                read_error: None,
                parse_error: Some(reason),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiji_remote::{CommandOutput, MockShell};

    fn identity(host: &str) -> LockIdentity {
        LockIdentity {
            user: "alice".to_string(),
            host: host.to_string(),
            pid: 99,
            version: "0.1.0".to_string(),
        }
    }

    fn lock() -> DistributedLock {
        DistributedLock::at_path(".jiji/shop/deploy.lock").with_identity(identity("laptop"))
    }

    fn reading(host: &str, content: impl Into<String>) -> Arc<dyn RemoteShell> {
        let content = content.into();
        Arc::new(MockShell::new(host, move |_| Ok(CommandOutput::ok(content.clone()))))
    }

    #[test]
    fn host_status_variants() {
        let locked = LockRecord::new("m", &identity("laptop"));
        let s = host_status("h1".into(), &locked.to_json());
        assert_eq!(s.state, LockState::Locked);

        let s = host_status("h1".into(), "");
        assert_eq!(s.state, LockState::Unlocked);
        assert!(s.parse_error.is_none());

        let s = host_status("h1".into(), "}}garbage");
        assert_eq!(s.state, LockState::Unlocked);
        assert!(s.parse_error.is_some());

        let mut released = locked.clone();
        released.locked = false;
        let s = host_status("h1".into(), &released.to_json());
        assert_eq!(s.state, LockState::Unlocked);
    }

    #[test]
    fn scripts_quote_paths() {
        let lock = DistributedLock::at_path("dir with space/deploy.lock");
        assert_eq!(lock.lock_dir(), "dir with space");
        assert!(lock.read_script().contains("'dir with space/deploy.lock'"));
        let write = lock.exclusive_write_script(r#"{"message":"it's"}"#);
        assert!(write.contains("set -C"));
        assert!(write.contains(r#"'{"message":"it'\''s"}'"#));
    }

    #[tokio::test]
    async fn status_is_fail_open_for_unreachable_and_corrupt_hosts() {
        let shells = vec![
            reading("ok", ""),
            reading("corrupt", "not json"),
            Arc::new(MockShell::unreachable("down")) as Arc<dyn RemoteShell>,
        ];
        let status = lock().status(&shells).await;

        assert!(!status.is_locked());
        assert_eq!(status.hosts.len(), 3);
        let hosts: Vec<_> = status.hosts.iter().map(|h| h.host.as_str()).collect();
        assert_eq!(hosts, vec!["ok", "corrupt", "down"]);
        assert!(status.host("corrupt").unwrap().parse_error.is_some());
        assert!(status.host("down").unwrap().read_error.is_some());
    }

    #[tokio::test]
    async fn acquire_without_hosts_fails() {
        let err = lock().acquire("m", &[], false).await.unwrap_err();
        assert!(matches!(err, LockError::NoHosts));
    }

    #[tokio::test]
    async fn contention_aborts_before_any_write() {
        let held = LockRecord::new("deploy v2", &identity("other")).to_json();
        let holder = Arc::new(MockShell::new("h1", move |_| Ok(CommandOutput::ok(held.clone()))));
        let free = Arc::new(MockShell::new("h2", |_| Ok(CommandOutput::ok(""))));
        let shells = vec![holder.clone() as Arc<dyn RemoteShell>, free.clone()];

        let err = lock().acquire("deploy v3", &shells, false).await.unwrap_err();

        assert_eq!(err.hosts(), vec!["h1"]);
        assert!(err.to_string().contains("deploy v2"));
        // Only the status read reached either host.
        assert_eq!(holder.call_count(), 1);
        assert_eq!(free.call_count(), 1);
    }

    #[tokio::test]
    async fn cleanup_only_judges_own_machine() {
        let mine = LockRecord::new("m", &identity("laptop")).to_json();
        let theirs = LockRecord::new("m", &identity("ci-runner")).to_json();

        let dead = Arc::new(MockShell::new("h1", move |cmd| {
            let script = cmd.script().unwrap_or_default();
            if script.contains("rm -f") {
                Ok(CommandOutput::ok("removed\n"))
            } else {
                Ok(CommandOutput::ok(mine.clone()))
            }
        }));
        let foreign = reading("h2", theirs);
        let shells = vec![dead as Arc<dyn RemoteShell>, foreign];

        let report = lock()
            .with_process_probe(|_| false)
            .cleanup_stale_locks(&shells)
            .await;
        assert_eq!(report.released, vec!["h1"]);
        assert_eq!(report.unverifiable, vec!["h2"]);
        assert!(report.active.is_empty());

        let report = lock()
            .with_process_probe(|_| true)
            .cleanup_stale_locks(&shells)
            .await;
        assert!(report.released.is_empty());
        assert_eq!(report.active, vec!["h1"]);
    }
}
