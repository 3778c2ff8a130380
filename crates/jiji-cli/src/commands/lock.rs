//! `jiji lock`: deploy lock across the target hosts.

use anyhow::{Result, bail};
use serde_json::json;

use jiji_audit::AuditLogger;
use jiji_lock::{DistributedLock, HostLockStatus, LockRecord, LockState, ReleaseOutcome};

use super::{Session, print_json};
use crate::GlobalArgs;

fn lock_for(session: &Session, concurrency: usize) -> DistributedLock {
    DistributedLock::new(&session.config).with_concurrency(concurrency)
}

pub async fn acquire(args: &GlobalArgs, message: &str, force: bool) -> Result<()> {
    let session = Session::load(args)?;
    let ctx = session.connect().await?;
    if !ctx.unreachable().is_empty() {
        let hosts: Vec<_> = ctx.unreachable().iter().map(|f| f.host.as_str()).collect();
        ctx.close().await;
        bail!("cannot lock while hosts are unreachable: {}", hosts.join(", "));
    }

    ctx.scoped(|ctx| async move {
        let shells = ctx.shells();
        let lock = lock_for(&session, ctx.command_concurrency());
        let audit = AuditLogger::new(&session.config).with_concurrency(ctx.command_concurrency());
        let action = if force { "lock force-acquire" } else { "lock acquire" };

        audit.log_started(shells, action, message).await;
        match lock.acquire(message, shells, force).await {
            Ok(acquisition) => {
                audit.log_success(shells, action, message).await;
                if session.json {
                    print_json(&acquisition)?;
                } else {
                    println!(
                        "✓ Deploy lock acquired on {} host(s): {}",
                        acquisition.hosts.len(),
                        acquisition.hosts.join(", ")
                    );
                }
                Ok(())
            }
            Err(e) => {
                audit.log_failure(shells, action, &e.to_string()).await;
                Err(e.into())
            }
        }
    })
    .await
}

pub async fn release(args: &GlobalArgs) -> Result<()> {
    let session = Session::load(args)?;
    let ctx = session.connect().await?;

    ctx.scoped(|ctx| async move {
        let shells = ctx.shells();
        let lock = lock_for(&session, ctx.command_concurrency());
        let report = lock.release(shells).await;

        let summary = format!(
            "released on {} host(s), {} failed",
            report.released.len(),
            report.failures.len()
        );
        let audit = AuditLogger::new(&session.config).with_concurrency(ctx.command_concurrency());
        if report.fully_released() {
            audit.log_success(shells, "lock release", &summary).await;
        } else {
            audit.log_warning(shells, "lock release", &summary).await;
        }

        if session.json {
            print_json(&json!({
                "released": report.released.iter()
                    .map(|r| json!({ "host": r.host, "outcome": r.value }))
                    .collect::<Vec<_>>(),
                "failures": report.failures.iter()
                    .map(|f| json!({ "host": f.host, "error": f.error.to_string() }))
                    .collect::<Vec<_>>(),
            }))?;
        } else {
            for r in &report.released {
                let outcome = match r.value {
                    ReleaseOutcome::Released => "released",
                    ReleaseOutcome::AlreadyAbsent => "was not locked",
                };
                println!("✓ {}: {outcome}", r.host);
            }
            for f in &report.failures {
                println!("✗ {f}");
            }
        }
        Ok(())
    })
    .await
}

pub async fn status(args: &GlobalArgs) -> Result<()> {
    let session = Session::load(args)?;
    let ctx = session.connect().await?;

    ctx.scoped(|ctx| async move {
        let lock = lock_for(&session, ctx.command_concurrency());
        let status = lock.status(ctx.shells()).await;
        let unreachable: Vec<_> = ctx.unreachable().iter().map(|f| f.host.clone()).collect();

        if session.json {
            return print_json(&json!({
                "locked": status.is_locked(),
                "hosts": &status.hosts,
                "unreachable": unreachable,
            }));
        }

        println!("{:<24} {:<9} {}", "HOST", "STATE", "HOLDER");
        for host in &status.hosts {
            println!("{:<24} {:<9} {}", host.host, state_label(host), holder_label(host));
        }
        for host in &unreachable {
            println!("{host:<24} {:<9} -", "?");
        }
        Ok(())
    })
    .await
}

pub async fn show(args: &GlobalArgs) -> Result<()> {
    let session = Session::load(args)?;
    let ctx = session.connect().await?;

    ctx.scoped(|ctx| async move {
        let lock = lock_for(&session, ctx.command_concurrency());
        let details = lock.show(ctx.shells()).await;

        if session.json {
            return print_json(&details);
        }
        match details {
            None => println!("Deploy lock is free"),
            Some(d) => {
                println!("Deploy lock held");
                print!("{}", describe_record(&d.record));
                println!("  Hosts:    {}", d.hosts.join(", "));
                if !d.other_hosts.is_empty() {
                    println!("  Held by another record on: {}", d.other_hosts.join(", "));
                }
            }
        }
        Ok(())
    })
    .await
}

pub async fn cleanup(args: &GlobalArgs) -> Result<()> {
    let session = Session::load(args)?;
    let ctx = session.connect().await?;

    ctx.scoped(|ctx| async move {
        let shells = ctx.shells();
        let lock = lock_for(&session, ctx.command_concurrency());
        let report = lock.cleanup_stale_locks(shells).await;

        if !report.released.is_empty() {
            let audit = AuditLogger::new(&session.config).with_concurrency(ctx.command_concurrency());
            let message = format!("released stale lock on {}", report.released.join(", "));
            audit.log_success(shells, "lock cleanup", &message).await;
        }

        if session.json {
            return print_json(&json!({
                "released": report.released,
                "active": report.active,
                "unverifiable": report.unverifiable,
                "failures": report.failures.iter()
                    .map(|f| json!({ "host": f.host, "error": f.error.to_string() }))
                    .collect::<Vec<_>>(),
            }));
        }
        for host in &report.released {
            println!("✓ {host}: stale lock released");
        }
        for host in &report.active {
            println!("  {host}: holder still running");
        }
        for host in &report.unverifiable {
            println!("  {host}: taken from another machine, left alone");
        }
        for f in &report.failures {
            println!("✗ {f}");
        }
        Ok(())
    })
    .await
}

fn state_label(host: &HostLockStatus) -> &'static str {
    match (host.state, &host.read_error, &host.parse_error) {
        (LockState::Locked, _, _) => "locked",
        (_, Some(_), _) => "error",
        (_, _, Some(_)) => "corrupt",
        (LockState::Unlocked, None, None) => "free",
    }
}

fn holder_label(host: &HostLockStatus) -> String {
    if let Some(record) = &host.record {
        return format!("{} at {} \"{}\"", record.owner(), record.acquired_at, record.message);
    }
    host.read_error
        .clone()
        .or_else(|| host.parse_error.clone())
        .unwrap_or_else(|| "-".to_string())
}

fn describe_record(record: &LockRecord) -> String {
    format!(
        "  Message:  {}\n  Holder:   {}\n  Acquired: {}\n  Version:  {}\n",
        record.message,
        record.owner(),
        record.acquired_at,
        record.version
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> LockRecord {
        LockRecord {
            locked: true,
            message: "deploy v2".to_string(),
            acquired_at: "2026-01-02T03:04:05.000Z".to_string(),
            acquired_by: "alice".to_string(),
            host: "laptop".to_string(),
            pid: 1234,
            version: "0.1.0".to_string(),
        }
    }

    fn host(state: LockState) -> HostLockStatus {
        HostLockStatus {
            host: "web-1".to_string(),
            state,
            record: None,
            read_error: None,
            parse_error: None,
        }
    }

    #[test]
    fn labels_for_each_state() {
        assert_eq!(state_label(&host(LockState::Unlocked)), "free");

        let mut corrupt = host(LockState::Unlocked);
        corrupt.parse_error = Some("expected value".to_string());
        assert_eq!(state_label(&corrupt), "corrupt");
        assert_eq!(holder_label(&corrupt), "expected value");

        let mut locked = host(LockState::Locked);
        locked.record = Some(record());
        assert_eq!(state_label(&locked), "locked");
        assert!(holder_label(&locked).contains("\"deploy v2\""));
    }

    #[test]
    fn record_description_lists_holder() {
        let text = describe_record(&record());
        assert!(text.contains("Message:  deploy v2"));
        assert!(text.contains(&record().owner()));
        assert!(text.ends_with('\n'));
    }
}
