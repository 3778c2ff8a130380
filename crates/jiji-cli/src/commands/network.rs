//! `jiji network`: registry inspection and garbage collection.

use anyhow::{Result, bail};
use serde_json::json;
use tracing::info;

use jiji_audit::AuditLogger;
use jiji_core::time::epoch_millis;
use jiji_core::{Container, ContainerDetails, Server};
use jiji_registry::{
    GcMode, GcPlan, GcReason, ServiceRegistry, Topology, container_records, execute_plan,
};

use super::{Session, human_duration, print_json};
use crate::GlobalArgs;

pub async fn status(args: &GlobalArgs) -> Result<()> {
    let session = Session::load(args)?;
    let ctx = session.connect().await?;

    ctx.scoped(|ctx| async move {
        let registry = ServiceRegistry::new(&session.config, ctx.shells().to_vec());
        let topology = Topology::load(&registry).await?;
        let containers = registry.query_all_containers_with_details(None).await?;
        let now_ms = epoch_millis();
        let offline_after = session.config.gc.offline_threshold_ms;

        if session.json {
            return print_json(&json!({
                "servers": topology.servers(),
                "containers": containers,
            }));
        }

        println!("{} server(s), {} container(s)", topology.len(), containers.len());
        for server in topology.servers() {
            println!();
            println!("{}", server_line(server, now_ms, offline_after));
            for details in containers.iter().filter(|d| d.container.server_id == server.id) {
                println!("    {}", container_line(&details.container, now_ms));
            }
        }

        let orphans: Vec<&ContainerDetails> = containers
            .iter()
            .filter(|d| d.server_hostname.is_none())
            .collect();
        if !orphans.is_empty() {
            println!();
            println!("unknown server");
            for details in orphans {
                println!(
                    "    {} on {}",
                    container_line(&details.container, now_ms),
                    details.container.server_id
                );
            }
        }
        Ok(())
    })
    .await
}

pub async fn dns(args: &GlobalArgs) -> Result<()> {
    let session = Session::load(args)?;
    let ctx = session.connect().await?;

    ctx.scoped(|ctx| async move {
        let registry = ServiceRegistry::new(&session.config, ctx.shells().to_vec());
        let containers = registry.list_containers().await?;
        let records: Vec<_> = containers
            .iter()
            .filter(|c| c.healthy)
            .flat_map(|c| container_records(c, registry.domain()))
            .collect();

        if session.json {
            return print_json(&records);
        }
        for record in &records {
            println!("{:<40} {}", record.name, record.ip);
        }
        Ok(())
    })
    .await
}

pub async fn inspect(args: &GlobalArgs, id_prefix: &str) -> Result<()> {
    let session = Session::load(args)?;
    let ctx = session.connect().await?;

    ctx.scoped(|ctx| async move {
        let registry = ServiceRegistry::new(&session.config, ctx.shells().to_vec());
        let Some(details) = registry.query_container_by_id(id_prefix).await? else {
            bail!("no container matches {id_prefix:?}");
        };

        if session.json {
            return print_json(&details);
        }
        let c = &details.container;
        println!("Container {}", c.id);
        println!("  Service:  {}", c.service);
        println!(
            "  Server:   {} ({})",
            details.server_hostname.as_deref().unwrap_or("unknown"),
            c.server_id
        );
        println!("  IP:       {}", c.ip);
        println!("  Healthy:  {}", health_label(c, epoch_millis()));
        println!("  Started:  {} ms", c.started_at);
        for record in container_records(c, registry.domain()) {
            println!("  DNS:      {}", record.name);
        }
        Ok(())
    })
    .await
}

pub async fn gc(
    args: &GlobalArgs,
    stale_seconds: Option<u64>,
    offline_ms: Option<u64>,
    force: bool,
) -> Result<()> {
    let session = Session::load(args)?;
    let ctx = session.connect().await?;
    let stale_secs = stale_seconds.unwrap_or(session.config.gc.stale_threshold_secs);
    let offline_ms = offline_ms.unwrap_or(session.config.gc.offline_threshold_ms);
    let mode = if force { GcMode::Confirmed } else { GcMode::DryRun };

    ctx.scoped(|ctx| async move {
        let shells = ctx.shells();
        let registry = ServiceRegistry::new(&session.config, shells.to_vec());
        let plan = GcPlan::collect(&registry, stale_secs, offline_ms, epoch_millis()).await?;
        info!(
            candidates = plan.candidates.len(),
            offline_servers = plan.offline_servers.len(),
            ?mode,
            "gc plan built"
        );

        let audit = AuditLogger::new(&session.config).with_concurrency(ctx.command_concurrency());
        let confirmed = mode == GcMode::Confirmed && !plan.is_empty();
        if confirmed {
            let message = format!("removing {} container(s)", plan.candidates.len());
            audit.log_started(shells, "network gc", &message).await;
        }

        let report = execute_plan(&registry, &plan, mode).await;

        if confirmed {
            let message = format!("deleted {}, failed {}", report.deleted.len(), report.failed.len());
            if report.failed.is_empty() {
                audit.log_success(shells, "network gc", &message).await;
            } else {
                audit.log_failure(shells, "network gc", &message).await;
            }
        }

        if session.json {
            print_json(&json!({ "plan": &plan, "report": &report }))?;
        } else {
            for candidate in &plan.candidates {
                let reasons: Vec<String> = candidate.reasons.iter().map(reason_label).collect();
                println!("{:<20} {}", candidate.container_id, reasons.join("; "));
            }
            match mode {
                GcMode::DryRun if plan.is_empty() => println!("Nothing to collect"),
                GcMode::DryRun => println!(
                    "{} container(s) would be removed; rerun with --force to delete",
                    report.pending()
                ),
                GcMode::Confirmed => {
                    println!("✓ Removed {} container(s)", report.deleted.len());
                    for failure in &report.failed {
                        println!("✗ {}: {}", failure.container_id, failure.error);
                    }
                }
            }
        }

        if !report.failed.is_empty() {
            bail!("{} container(s) could not be removed", report.failed.len());
        }
        Ok(())
    })
    .await
}

fn server_line(server: &Server, now_ms: u64, offline_after_ms: u64) -> String {
    let silent_ms = now_ms.saturating_sub(server.last_seen.saturating_mul(1000));
    let state = if silent_ms > offline_after_ms { "offline" } else { "online" };
    format!(
        "{} ({})  {}  subnet {}  seen {} ago  [{state}]",
        server.hostname,
        server.id,
        server.overlay_ip,
        server.subnet,
        human_duration(silent_ms)
    )
}

fn container_line(container: &Container, now_ms: u64) -> String {
    format!(
        "{:<14} {:<16} {:<15} {}",
        short_id(&container.id),
        container.service,
        container.ip,
        health_label(container, now_ms)
    )
}

fn health_label(container: &Container, now_ms: u64) -> String {
    if container.healthy {
        return "healthy".to_string();
    }
    match container.unhealthy_since {
        Some(since) => format!("unhealthy for {}", human_duration(now_ms.saturating_sub(since))),
        None => "unhealthy".to_string(),
    }
}

fn reason_label(reason: &GcReason) -> String {
    match reason {
        GcReason::Stale {
            unhealthy_for_ms,
            inferred,
        } => {
            let approx = if *inferred { "~" } else { "" };
            format!("unhealthy for {approx}{}", human_duration(*unhealthy_for_ms))
        }
        GcReason::ServerOffline {
            server_id,
            offline_for_ms,
        } => format!("server {server_id} offline for {}", human_duration(*offline_for_ms)),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
