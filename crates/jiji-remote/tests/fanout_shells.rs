//! Fanout over real shells: local hosts, unreachable hosts, and retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use jiji_remote::*;

fn shells(dirs: &[&std::path::Path]) -> Vec<Arc<dyn RemoteShell>> {
    dirs.iter()
        .enumerate()
        .map(|(i, dir)| Arc::new(LocalShell::new(format!("host-{i}")).in_dir(*dir)) as Arc<dyn RemoteShell>)
        .collect()
}

#[tokio::test]
async fn fanout_over_local_hosts_collects_per_host_output() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    std::fs::write(a.path().join("id"), "alpha").unwrap();
    std::fs::write(b.path().join("id"), "beta").unwrap();

    let shells = shells(&[a.path(), b.path()]);
    let result = fanout_shells(&shells, 4, |shell| async move {
        let out = shell.run(&RemoteCommand::new("cat").arg("id")).await?;
        Ok::<_, RemoteError>(out.stdout)
    })
    .await;

    assert!(result.all_succeeded());
    let values: Vec<_> = result.values().cloned().collect();
    assert_eq!(values, vec!["alpha", "beta"]);
}

#[tokio::test]
async fn unreachable_host_lands_in_host_errors() {
    let dir = tempfile::tempdir().unwrap();
    let shells: Vec<Arc<dyn RemoteShell>> = vec![
        Arc::new(LocalShell::new("up").in_dir(dir.path())),
        Arc::new(MockShell::unreachable("down")),
    ];

    let result = fanout_shells(&shells, 4, |shell| async move {
        shell.run(&RemoteCommand::new("true")).await
    })
    .await;

    assert_eq!(result.len(), 2);
    assert_eq!(result.succeeded_hosts(), vec!["up"]);
    assert_eq!(result.failed_hosts(), vec!["down"]);
    assert!(result.host_errors[0].error.is_connectivity());
}

#[tokio::test]
async fn retry_decorator_wraps_a_flaky_host() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let flaky = Arc::new(MockShell::new("flaky", move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(RemoteError::Connect {
                host: "flaky".to_string(),
                message: "reset by peer".to_string(),
            })
        } else {
            Ok(CommandOutput::ok("done"))
        }
    }));
    let shells = vec![flaky as Arc<dyn RemoteShell>];
    let policy = RetryPolicy::default().with_backoff(Duration::from_millis(1), Duration::from_millis(2));

    let result = fanout_shells(&shells, 1, |shell| {
        let policy = policy.clone();
        async move {
            let cmd = RemoteCommand::new("true");
            with_retry(&policy, || shell.run(&cmd))
                .await
                .map(|out| out.stdout)
        }
    })
    .await;

    assert!(result.all_succeeded());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn slow_hosts_overlap_in_flight() {
    let shells: Vec<Arc<dyn RemoteShell>> = (0..5)
        .map(|i| Arc::new(MockShell::ok(format!("h{i}")).with_delay(Duration::from_millis(100))) as Arc<dyn RemoteShell>)
        .collect();

    let started = std::time::Instant::now();
    let result = fanout_shells(&shells, 5, |shell| async move {
        shell.run(&RemoteCommand::new("true")).await
    })
    .await;

    assert!(result.all_succeeded());
    assert!(started.elapsed() < Duration::from_millis(400));
}
