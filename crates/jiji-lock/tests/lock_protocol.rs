//! Lock protocol tests against real files.
//!
//! Each "host" is a `LocalShell` rooted in its own temp directory, so the
//! lock file lands at `<tempdir>/.jiji/shop/deploy.lock`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use jiji_lock::*;
use jiji_remote::{CommandOutput, LocalShell, MockShell, RemoteShell};
use tempfile::TempDir;

const LOCK_PATH: &str = ".jiji/shop/deploy.lock";

struct Cluster {
    dirs: Vec<TempDir>,
    shells: Vec<Arc<dyn RemoteShell>>,
}

impl Cluster {
    fn new(hosts: &[&str]) -> Self {
        let dirs: Vec<TempDir> = hosts.iter().map(|_| tempfile::tempdir().unwrap()).collect();
        let shells = hosts
            .iter()
            .zip(&dirs)
            .map(|(host, dir)| Arc::new(LocalShell::new(*host).in_dir(dir.path())) as Arc<dyn RemoteShell>)
            .collect();
        Self { dirs, shells }
    }

    fn pick(&self, hosts: &[&str]) -> Vec<Arc<dyn RemoteShell>> {
        hosts
            .iter()
            .map(|h| {
                self.shells
                    .iter()
                    .find(|s| s.host() == *h)
                    .cloned()
                    .unwrap()
            })
            .collect()
    }

    fn lock_file(&self, index: usize) -> std::path::PathBuf {
        self.dirs[index].path().join(LOCK_PATH)
    }
}

fn identity() -> LockIdentity {
    LockIdentity {
        user: "alice".to_string(),
        host: "laptop".to_string(),
        pid: 1234,
        version: "0.1.0".to_string(),
    }
}

fn lock() -> DistributedLock {
    DistributedLock::at_path(LOCK_PATH).with_identity(identity())
}

#[tokio::test]
async fn acquire_writes_record_on_every_host() {
    let cluster = Cluster::new(&["h1", "h2"]);
    let acquired = lock().acquire("deploy v1", &cluster.shells, false).await.unwrap();

    assert_eq!(acquired.hosts, vec!["h1", "h2"]);
    for i in 0..2 {
        let content = std::fs::read_to_string(cluster.lock_file(i)).unwrap();
        let record = LockRecord::parse(&content).unwrap().unwrap();
        assert!(record.locked);
        assert_eq!(record.message, "deploy v1");
        assert_eq!(record.acquired_by, "alice");
        assert_eq!(record.pid, 1234);
    }

    let status = lock().status(&cluster.shells).await;
    assert!(status.is_locked());
    assert_eq!(status.locked_hosts(), vec!["h1", "h2"]);
}

#[tokio::test]
async fn held_lock_blocks_wider_acquire_without_orphaned_writes() {
    let cluster = Cluster::new(&["a", "b"]);
    lock().acquire("m1", &cluster.pick(&["a"]), false).await.unwrap();

    let err = lock().acquire("m2", &cluster.pick(&["a", "b"]), false).await.unwrap_err();
    assert!(matches!(err, LockError::Contention { .. }));

    let status = lock().status(&cluster.pick(&["a", "b"])).await;
    assert_eq!(status.host("a").unwrap().state, LockState::Locked);
    assert_eq!(status.host("b").unwrap().state, LockState::Unlocked);
    assert!(!cluster.lock_file(1).exists());
}

#[tokio::test]
async fn deploy_lock_scenario() {
    let cluster = Cluster::new(&["h1", "h2"]);
    let lock = lock();

    lock.acquire("deploy v2", &cluster.shells, false).await.unwrap();

    let err = lock.acquire("deploy v3", &cluster.shells, false).await.unwrap_err();
    let text = err.to_string();
    assert!(text.contains("h1"), "{text}");
    assert!(text.contains("h2"), "{text}");
    assert!(text.contains("deploy v2"), "{text}");
    assert_eq!(err.hosts(), vec!["h1", "h2"]);

    let released = lock.release(&cluster.shells).await;
    assert!(released.fully_released());

    let acquired = lock.acquire("deploy v3", &cluster.shells, false).await.unwrap();
    assert_eq!(acquired.record.message, "deploy v3");
}

#[tokio::test]
async fn release_is_idempotent() {
    let cluster = Cluster::new(&["h1", "h2"]);
    let lock = lock();
    lock.acquire("deploy", &cluster.shells, false).await.unwrap();

    let first = lock.release(&cluster.shells).await;
    assert!(first.fully_released());
    assert!(first.released.iter().all(|r| r.value == ReleaseOutcome::Released));

    let second = lock.release(&cluster.shells).await;
    assert!(second.fully_released());
    assert_eq!(second.released.len(), 2);
    assert!(second.released.iter().all(|r| r.value == ReleaseOutcome::AlreadyAbsent));
}

#[tokio::test]
async fn release_reports_unreachable_hosts_without_failing() {
    let cluster = Cluster::new(&["h1"]);
    let mut shells = cluster.shells.clone();
    shells.push(Arc::new(MockShell::unreachable("down")));

    let report = lock().release(&shells).await;
    assert_eq!(report.released.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].host, "down");
}

#[tokio::test]
async fn failed_write_rolls_back_successful_hosts() {
    let cluster = Cluster::new(&["good", "broken"]);
    // A regular file where the state directory should be makes mkdir fail.
    std::fs::write(cluster.dirs[1].path().join(".jiji"), "not a directory").unwrap();

    let err = lock().acquire("deploy", &cluster.shells, false).await.unwrap_err();
    match &err {
        LockError::Partial {
            failures,
            rolled_back,
            rollback_failures,
        } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].host, "broken");
            assert_eq!(rolled_back, &vec!["good".to_string()]);
            assert!(rollback_failures.is_empty());
        }
        other => panic!("expected partial failure, got {other}"),
    }
    assert!(!cluster.lock_file(0).exists());
    assert!(!lock().status(&cluster.shells).await.is_locked());
}

#[tokio::test]
async fn unreachable_host_fails_acquire_and_rolls_back() {
    let cluster = Cluster::new(&["h1"]);
    let mut shells = cluster.shells.clone();
    shells.push(Arc::new(MockShell::unreachable("down")));

    let err = lock().acquire("deploy", &shells, false).await.unwrap_err();
    assert_eq!(err.hosts(), vec!["down"]);
    assert!(!cluster.lock_file(0).exists());
}

#[tokio::test]
async fn exclusive_create_catches_a_racing_writer() {
    let cluster = Cluster::new(&["h1"]);
    let rival = LockRecord::new(
        "rival deploy",
        &LockIdentity {
            user: "bob".to_string(),
            host: "ci".to_string(),
            pid: 7,
            version: "0.1.0".to_string(),
        },
    )
    .to_json();

    // h2 looks free when status is read, but another acquirer creates the
    // file before our exclusive write lands.
    let raced = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&raced);
    let racy = MockShell::new("h2", move |cmd| {
        let script = cmd.script().unwrap_or_default();
        if script.contains("set -C") {
            seen.store(true, Ordering::SeqCst);
            Ok(CommandOutput::failed(3, ""))
        } else if seen.load(Ordering::SeqCst) {
            Ok(CommandOutput::ok(rival.clone()))
        } else {
            Ok(CommandOutput::ok(""))
        }
    });
    let mut shells = cluster.shells.clone();
    shells.push(Arc::new(racy));

    let err = lock().acquire("mine", &shells, false).await.unwrap_err();
    assert!(matches!(err, LockError::Contention { .. }));
    assert_eq!(err.hosts(), vec!["h2"]);
    assert!(err.to_string().contains("rival deploy"));
    assert!(raced.load(Ordering::SeqCst));
    // Whatever h1 got was rolled back.
    assert!(!cluster.lock_file(0).exists());
}

#[tokio::test]
async fn force_overrides_existing_lock() {
    let cluster = Cluster::new(&["h1", "h2"]);
    let lock = lock();
    lock.acquire("old", &cluster.pick(&["h1"]), false).await.unwrap();

    let acquired = lock.acquire("new", &cluster.shells, true).await.unwrap();
    assert_eq!(acquired.hosts.len(), 2);

    let details = lock.show(&cluster.shells).await.unwrap();
    assert_eq!(details.record.message, "new");
    assert_eq!(details.hosts, vec!["h1", "h2"]);
    assert!(details.other_hosts.is_empty());
}

#[tokio::test]
async fn corrupt_lock_file_reads_as_unlocked() {
    let cluster = Cluster::new(&["h1"]);
    let path = cluster.lock_file(0);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{{{ definitely not json").unwrap();

    let status = lock().status(&cluster.shells).await;
    assert!(!status.is_locked());
    assert!(status.hosts[0].parse_error.is_some());
    assert!(lock().show(&cluster.shells).await.is_none());
}

#[tokio::test]
async fn stale_lock_from_dead_local_process_is_released() {
    let cluster = Cluster::new(&["h1"]);
    lock().acquire("crashed deploy", &cluster.shells, false).await.unwrap();

    let report = lock()
        .with_process_probe(|pid| pid != 1234)
        .cleanup_stale_locks(&cluster.shells)
        .await;

    assert_eq!(report.released, vec!["h1"]);
    assert!(!cluster.lock_file(0).exists());
}
