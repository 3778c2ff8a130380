//! Reconciler / garbage collection.
//!
//! Staleness is judged client-side: rows are read from the registry and
//! compared against the caller's clock. The registry itself has no TTL.
//! A container can qualify both as stale and as orphaned by an offline
//! server, so candidates are de-duplicated by id before anything is
//! deleted. Deleting requires [`GcMode::Confirmed`]; the default is a dry
//! run that only reports.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use jiji_core::validate::validate_id;
use jiji_core::{Container, Server};

use crate::error::RegistryResult;
use crate::registry::ServiceRegistry;
use crate::schema::{CONTAINER_COLUMNS, SERVER_COLUMNS};
use crate::sql::Statement;

/// An unhealthy container past the staleness threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleContainer {
    pub container: Container,
    pub unhealthy_for_ms: u64,
    /// No `unhealthy_since` was recorded; the duration is measured from
    /// `started_at` and overstates how long the container has been down.
    pub inferred: bool,
}

/// A server whose heartbeat is older than the offline threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfflineServer {
    pub server: Server,
    pub offline_for_ms: u64,
    pub container_count: u64,
    pub container_ids: Vec<String>,
}

impl ServiceRegistry {
    /// Unhealthy containers that have been unhealthy for longer than
    /// `threshold_secs` as of `now_ms`.
    ///
    /// A lower threshold never yields fewer containers.
    pub async fn query_stale_containers(
        &self,
        threshold_secs: u64,
        now_ms: u64,
    ) -> RegistryResult<Vec<StaleContainer>> {
        let unhealthy: Vec<Container> = self
            .read(Statement::new(format!(
                "SELECT {CONTAINER_COLUMNS} FROM containers c WHERE c.healthy = 0 ORDER BY c.id"
            )))
            .await?;
        Ok(filter_stale(unhealthy, threshold_secs, now_ms))
    }

    /// Servers whose `last_seen` is more than `threshold_ms` before `now_ms`,
    /// with the containers still registered under them.
    pub async fn query_offline_servers(
        &self,
        threshold_ms: u64,
        now_ms: u64,
    ) -> RegistryResult<Vec<OfflineServer>> {
        let servers: Vec<Server> = self
            .read(Statement::new(format!("SELECT {SERVER_COLUMNS} FROM servers ORDER BY id")))
            .await?;

        let mut offline = Vec::new();
        for server in servers {
            let last_seen_ms = server.last_seen.saturating_mul(1000);
            let offline_for_ms = now_ms.saturating_sub(last_seen_ms);
            if offline_for_ms <= threshold_ms {
                continue;
            }
            // Count and ids come from the same read so they always agree.
            let container_ids: Vec<String> = self
                .read(
                    Statement::new("SELECT id FROM containers WHERE server_id = ? ORDER BY id")
                        .bind(&server.id),
                )
                .await?;
            offline.push(OfflineServer {
                server,
                offline_for_ms,
                container_count: container_ids.len() as u64,
                container_ids,
            });
        }
        Ok(offline)
    }

    /// Delete each distinct id with its own statement. Returns how many
    /// deletes were issued.
    pub async fn delete_containers_by_ids(&self, ids: &[String]) -> RegistryResult<usize> {
        let mut distinct: Vec<&String> = Vec::with_capacity(ids.len());
        for id in ids {
            validate_id(id)?;
            if !distinct.contains(&id) {
                distinct.push(id);
            }
        }
        for id in &distinct {
            self.write(Statement::new("DELETE FROM containers WHERE id = ?").bind(*id))
                .await?;
        }
        Ok(distinct.len())
    }

    /// Delete every container registered under `server_id`.
    pub async fn delete_containers_by_server(&self, server_id: &str) -> RegistryResult<()> {
        validate_id(server_id)?;
        self.write(Statement::new("DELETE FROM containers WHERE server_id = ?").bind(server_id))
            .await?;
        info!(server = %server_id, "containers of server deleted");
        Ok(())
    }
}

fn filter_stale(unhealthy: Vec<Container>, threshold_secs: u64, now_ms: u64) -> Vec<StaleContainer> {
    let threshold_ms = threshold_secs.saturating_mul(1000);
    unhealthy
        .into_iter()
        .filter(|c| !c.healthy)
        .filter_map(|container| {
            let (since, inferred) = match container.unhealthy_since {
                Some(since) => (since, false),
                None => (container.started_at, true),
            };
            let unhealthy_for_ms = now_ms.saturating_sub(since);
            (unhealthy_for_ms > threshold_ms).then_some(StaleContainer {
                container,
                unhealthy_for_ms,
                inferred,
            })
        })
        .collect()
}

// ── Plan ──────────────────────────────────────────────────────────

/// Why a container is slated for removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GcReason {
    Stale { unhealthy_for_ms: u64, inferred: bool },
    ServerOffline { server_id: String, offline_for_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcCandidate {
    pub container_id: String,
    pub reasons: Vec<GcReason>,
}

/// De-duplicated set of containers to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcPlan {
    pub candidates: Vec<GcCandidate>,
    /// Offline servers considered, including those with no containers.
    pub offline_servers: Vec<String>,
}

impl GcPlan {
    /// Merge stale containers and containers of offline servers, keeping
    /// one candidate per id with every reason it qualified.
    pub fn build(stale: &[StaleContainer], offline: &[OfflineServer]) -> Self {
        let mut by_id: BTreeMap<String, Vec<GcReason>> = BTreeMap::new();
        for s in stale {
            by_id
                .entry(s.container.id.clone())
                .or_default()
                .push(GcReason::Stale {
                    unhealthy_for_ms: s.unhealthy_for_ms,
                    inferred: s.inferred,
                });
        }
        for server in offline {
            for id in &server.container_ids {
                by_id.entry(id.clone()).or_default().push(GcReason::ServerOffline {
                    server_id: server.server.id.clone(),
                    offline_for_ms: server.offline_for_ms,
                });
            }
        }
        Self {
            candidates: by_id
                .into_iter()
                .map(|(container_id, reasons)| GcCandidate {
                    container_id,
                    reasons,
                })
                .collect(),
            offline_servers: offline.iter().map(|o| o.server.id.clone()).collect(),
        }
    }

    /// Query the registry and build a plan.
    pub async fn collect(
        registry: &ServiceRegistry,
        stale_threshold_secs: u64,
        offline_threshold_ms: u64,
        now_ms: u64,
    ) -> RegistryResult<Self> {
        let stale = registry.query_stale_containers(stale_threshold_secs, now_ms).await?;
        let offline = registry.query_offline_servers(offline_threshold_ms, now_ms).await?;
        Ok(Self::build(&stale, &offline))
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn container_ids(&self) -> Vec<String> {
        self.candidates.iter().map(|c| c.container_id.clone()).collect()
    }
}

// ── Execution ─────────────────────────────────────────────────────

/// Whether GC may delete. Deleting is always an explicit opt-in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GcMode {
    #[default]
    DryRun,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcFailure {
    pub container_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub mode: GcMode,
    pub planned: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<GcFailure>,
}

impl GcReport {
    /// Deletions still outstanding (all of them in a dry run).
    pub fn pending(&self) -> usize {
        self.planned.len() - self.deleted.len()
    }
}

/// Carry out `plan`. A dry run issues no statements at all; a confirmed
/// run issues exactly one delete per candidate and keeps going past
/// individual failures.
pub async fn execute_plan(registry: &ServiceRegistry, plan: &GcPlan, mode: GcMode) -> GcReport {
    let planned = plan.container_ids();
    let mut report = GcReport {
        mode,
        planned: planned.clone(),
        deleted: Vec::new(),
        failed: Vec::new(),
    };

    if mode == GcMode::DryRun {
        info!(candidates = planned.len(), "gc dry run, nothing deleted");
        return report;
    }

    for id in planned {
        match registry.delete_containers_by_ids(std::slice::from_ref(&id)).await {
            Ok(_) => report.deleted.push(id),
            Err(error) => {
                warn!(container = %id, %error, "gc delete failed");
                report.failed.push(GcFailure {
                    container_id: id,
                    error: error.to_string(),
                });
            }
        }
    }
    info!(
        deleted = report.deleted.len(),
        failed = report.failed.len(),
        "gc completed"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhealthy(id: &str, started_at: u64, since: Option<u64>) -> Container {
        let mut c = Container::new(id, "web", "srv-1", "10.0.0.1", started_at);
        c.healthy = false;
        c.unhealthy_since = since;
        c
    }

    fn stale(id: &str) -> StaleContainer {
        StaleContainer {
            container: unhealthy(id, 0, Some(0)),
            unhealthy_for_ms: 10_000,
            inferred: false,
        }
    }

    fn offline(server: &str, ids: &[&str]) -> OfflineServer {
        OfflineServer {
            server: Server {
                id: server.to_string(),
                hostname: format!("{server}.example"),
                subnet: "10.210.1.0/24".to_string(),
                overlay_ip: "10.210.1.1".to_string(),
                overlay_pubkey: "pk".to_string(),
                management_ip: "192.0.2.1".to_string(),
                endpoints: Vec::new(),
                last_seen: 0,
            },
            offline_for_ms: 900_000,
            container_count: ids.len() as u64,
            container_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn explicit_transition_time_wins_over_start_time() {
        let now = 10_000_000;
        let containers = vec![
            // Started long ago, unhealthy only for 10s.
            unhealthy("recent", 0, Some(now - 10_000)),
            // No transition recorded; inferred from start.
            unhealthy("legacy", now - 7_200_000, None),
        ];
        let stale = filter_stale(containers, 3600, now);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].container.id, "legacy");
        assert!(stale[0].inferred);
        assert_eq!(stale[0].unhealthy_for_ms, 7_200_000);
    }

    #[test]
    fn threshold_is_monotonic() {
        let now = 100_000_000;
        let containers: Vec<Container> = (0..50u64)
            .map(|i| unhealthy(&format!("c{i}"), 0, Some(now - i * 97_000)))
            .collect();
        let mut previous = usize::MAX;
        for threshold in (0..5000).step_by(250) {
            let ids: Vec<String> = filter_stale(containers.clone(), threshold, now)
                .into_iter()
                .map(|s| s.container.id)
                .collect();
            assert!(ids.len() <= previous);
            let lower: Vec<String> = filter_stale(containers.clone(), threshold / 2, now)
                .into_iter()
                .map(|s| s.container.id)
                .collect();
            assert!(ids.iter().all(|id| lower.contains(id)));
            previous = ids.len();
        }
    }

    #[test]
    fn future_timestamps_are_not_stale() {
        let stale = filter_stale(vec![unhealthy("skewed", 0, Some(5_000))], 0, 1_000);
        assert!(stale.is_empty());
    }

    #[test]
    fn plan_deduplicates_and_keeps_reasons() {
        let plan = GcPlan::build(
            &[stale("a"), stale("b")],
            &[offline("srv-9", &["b", "c"]), offline("srv-8", &[])],
        );
        assert_eq!(plan.container_ids(), vec!["a", "b", "c"]);
        let b = &plan.candidates[1];
        assert_eq!(b.reasons.len(), 2);
        assert!(matches!(b.reasons[0], GcReason::Stale { .. }));
        assert!(matches!(&b.reasons[1], GcReason::ServerOffline { server_id, .. } if server_id == "srv-9"));
        assert_eq!(plan.offline_servers, vec!["srv-9", "srv-8"]);
    }

    #[test]
    fn default_mode_is_dry_run() {
        assert_eq!(GcMode::default(), GcMode::DryRun);
        assert!(GcPlan::default().is_empty());
    }
}
