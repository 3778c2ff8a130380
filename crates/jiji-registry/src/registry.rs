//! ServiceRegistry: typed operations over the replicated registry.
//!
//! Provides registration, health and heartbeat updates, and lookups over
//! servers, services, and containers. Reads are answered by the first
//! reachable host (eventually consistent); writes land on one host and
//! replicate by gossip, except [`ServiceRegistry::register_container_cluster_wide`],
//! which writes to every host so the container is resolvable everywhere
//! immediately.

use std::sync::Arc;

use tracing::{info, warn};

use jiji_core::JijiConfig;
use jiji_core::validate::{validate_hostname, validate_id, validate_ip, validate_name};
use jiji_core::{Container, ContainerDetails, Server, Service};
use jiji_remote::{FanoutResult, RemoteShell, fanout_shells};

use crate::client::RegistryClient;
use crate::dns::{self, CommandDnsProjection, DnsProjection, DnsRecord, container_records};
use crate::error::{RegistryError, RegistryResult};
use crate::schema::{CONTAINER_COLUMNS, SERVER_COLUMNS};
use crate::sql::Statement;

/// Typed client over the registry tables.
pub struct ServiceRegistry {
    /// Hosts in read preference order.
    shells: Vec<Arc<dyn RemoteShell>>,
    client: RegistryClient,
    project: String,
    dns: Arc<dyn DnsProjection>,
    domain: String,
    concurrency: usize,
}

impl ServiceRegistry {
    pub fn new(config: &JijiConfig, shells: Vec<Arc<dyn RemoteShell>>) -> Self {
        Self {
            shells,
            client: RegistryClient::from_config(&config.registry),
            project: config.project.clone(),
            dns: Arc::new(CommandDnsProjection::new(&config.dns)),
            domain: config.dns.domain.clone(),
            concurrency: config.ssh.command_concurrency.max(1),
        }
    }

    /// Replace the DNS projection hooks.
    pub fn with_dns(mut self, dns: Arc<dyn DnsProjection>) -> Self {
        self.dns = dns;
        self
    }

    pub fn with_client(mut self, client: RegistryClient) -> Self {
        self.client = client;
        self
    }

    pub fn shells(&self) -> &[Arc<dyn RemoteShell>] {
        &self.shells
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    pub(crate) async fn read<T: crate::rows::FromRow>(&self, stmt: Statement) -> RegistryResult<Vec<T>> {
        self.client.query_any(&self.shells, &stmt).await
    }

    pub(crate) async fn write(&self, stmt: Statement) -> RegistryResult<Arc<dyn RemoteShell>> {
        self.client.exec_any(&self.shells, &stmt).await
    }

    // ── Servers ────────────────────────────────────────────────────

    /// Insert or replace a server row.
    pub async fn register_server(&self, server: &Server) -> RegistryResult<()> {
        validate_id(&server.id)?;
        validate_hostname(&server.hostname)?;
        validate_ip(&server.overlay_ip)?;
        validate_ip(&server.management_ip)?;
        jiji_core::validate::parse_ipv4_cidr(&server.subnet)?;
        jiji_core::validate::validate_pubkey(&server.overlay_pubkey)?;
        for endpoint in &server.endpoints {
            jiji_core::validate::validate_endpoint(endpoint)?;
        }
        let endpoints = serde_json::to_string(&server.endpoints).unwrap_or_else(|_| "[]".to_string());

        self.write(
            Statement::new(format!(
                "INSERT OR REPLACE INTO servers ({SERVER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(&server.id)
            .bind(&server.hostname)
            .bind(&server.subnet)
            .bind(&server.overlay_ip)
            .bind(&server.overlay_pubkey)
            .bind(&server.management_ip)
            .bind(endpoints)
            .bind(server.last_seen),
        )
        .await?;
        info!(server = %server.id, hostname = %server.hostname, "server registered");
        Ok(())
    }

    /// Refresh a server's `last_seen` (epoch seconds).
    pub async fn heartbeat_server(&self, server_id: &str, now_secs: u64) -> RegistryResult<()> {
        validate_id(server_id)?;
        self.write(
            Statement::new("UPDATE servers SET last_seen = ? WHERE id = ?")
                .bind(now_secs)
                .bind(server_id),
        )
        .await?;
        Ok(())
    }

    pub async fn list_servers(&self) -> RegistryResult<Vec<Server>> {
        self.read(Statement::new(format!(
            "SELECT {SERVER_COLUMNS} FROM servers ORDER BY hostname"
        )))
        .await
    }

    // ── Services ───────────────────────────────────────────────────

    /// Insert or replace a service row for this project.
    pub async fn register_service(&self, name: &str) -> RegistryResult<()> {
        validate_name(name)?;
        self.write(
            Statement::new("INSERT OR REPLACE INTO services (name, project) VALUES (?, ?)")
                .bind(name)
                .bind(&self.project),
        )
        .await?;
        Ok(())
    }

    pub async fn list_services(&self) -> RegistryResult<Vec<Service>> {
        self.read(Statement::new("SELECT name, project FROM services ORDER BY name"))
            .await
    }

    // ── Containers ─────────────────────────────────────────────────

    /// Register a container (and its service). DNS projection runs on the
    /// host that took the write.
    pub async fn register_container(&self, container: &Container) -> RegistryResult<()> {
        let stmt = container_upsert(container)?;
        self.register_service(&container.service).await?;
        let shell = self.write(stmt).await?;
        info!(
            container = %container.id,
            service = %container.service,
            host = %shell.host(),
            "container registered"
        );
        dns::project(
            self.dns.as_ref(),
            shell.as_ref(),
            &container_records(container, &self.domain),
        )
        .await;
        Ok(())
    }

    /// Write the container row to every host in `shells` rather than waiting
    /// for replication. Each host also projects the DNS names locally.
    pub async fn register_container_cluster_wide(
        &self,
        shells: &[Arc<dyn RemoteShell>],
        container: &Container,
    ) -> RegistryResult<FanoutResult<(), RegistryError>> {
        let stmt = container_upsert(container)?;
        stmt.render()?;
        let service = Statement::new("INSERT OR IGNORE INTO services (name, project) VALUES (?, ?)")
            .bind(&container.service)
            .bind(&self.project);
        let records = container_records(container, &self.domain);

        let result: FanoutResult<(), RegistryError> =
            fanout_shells(shells, self.concurrency, |shell| {
                let (stmt, service, records) = (stmt.clone(), service.clone(), records.clone());
                async move {
                    self.client.exec(shell.as_ref(), &service).await?;
                    self.client.exec(shell.as_ref(), &stmt).await?;
                    dns::project(self.dns.as_ref(), shell.as_ref(), &records).await;
                    Ok::<_, RegistryError>(())
                }
            })
            .await;

        for failure in &result.host_errors {
            warn!(host = %failure.host, error = %failure.error, container = %container.id, "cluster-wide registration failed on host");
        }
        info!(
            container = %container.id,
            hosts = result.results.len(),
            failed = result.host_errors.len(),
            "container registered cluster-wide"
        );
        Ok(result)
    }

    /// Delete a container row and withdraw its DNS names. Unknown ids are
    /// not an error.
    pub async fn unregister_container(&self, id: &str) -> RegistryResult<()> {
        validate_id(id)?;
        let existing: Vec<Container> = self
            .read(
                Statement::new(format!(
                    "SELECT {CONTAINER_COLUMNS} FROM containers c WHERE c.id = ?"
                ))
                .bind(id),
            )
            .await?;

        let shell = self
            .write(Statement::new("DELETE FROM containers WHERE id = ?").bind(id))
            .await?;
        info!(container = %id, host = %shell.host(), "container unregistered");

        if let Some(container) = existing.first() {
            let records: Vec<DnsRecord> = container_records(container, &self.domain);
            dns::retract(self.dns.as_ref(), shell.as_ref(), &records).await;
        }
        Ok(())
    }

    /// Mark a container healthy or unhealthy. The first transition to
    /// unhealthy records `unhealthy_since`; becoming healthy clears it.
    pub async fn set_container_health(&self, id: &str, healthy: bool, now_ms: u64) -> RegistryResult<()> {
        validate_id(id)?;
        self.write(
            Statement::new(
                "UPDATE containers SET healthy = ?, \
                 unhealthy_since = CASE WHEN ? THEN NULL ELSE COALESCE(unhealthy_since, ?) END \
                 WHERE id = ?",
            )
            .bind(healthy)
            .bind(healthy)
            .bind(now_ms)
            .bind(id),
        )
        .await?;
        Ok(())
    }

    /// Overlay IPs of the healthy containers of `service`.
    pub async fn query_service_containers(&self, service: &str) -> RegistryResult<Vec<String>> {
        validate_name(service)?;
        self.read(
            Statement::new(
                "SELECT ip FROM containers WHERE service = ? AND healthy = 1 ORDER BY started_at, id",
            )
            .bind(service),
        )
        .await
    }

    /// Every container joined with its server's hostname, optionally
    /// limited to one service.
    pub async fn query_all_containers_with_details(
        &self,
        service: Option<&str>,
    ) -> RegistryResult<Vec<ContainerDetails>> {
        let base = format!(
            "SELECT {CONTAINER_COLUMNS}, s.hostname FROM containers c \
             LEFT JOIN servers s ON s.id = c.server_id"
        );
        let stmt = match service {
            Some(name) => {
                validate_name(name)?;
                Statement::new(format!("{base} WHERE c.service = ? ORDER BY c.service, c.started_at, c.id"))
                    .bind(name)
            }
            None => Statement::new(format!("{base} ORDER BY c.service, c.started_at, c.id")),
        };
        self.read(stmt).await
    }

    /// The first container whose id starts with `prefix`.
    pub async fn query_container_by_id(&self, prefix: &str) -> RegistryResult<Option<ContainerDetails>> {
        validate_id(prefix)?;
        let rows: Vec<ContainerDetails> = self
            .read(
                Statement::new(format!(
                    "SELECT {CONTAINER_COLUMNS}, s.hostname FROM containers c \
                     LEFT JOIN servers s ON s.id = c.server_id \
                     WHERE substr(c.id, 1, ?) = ? ORDER BY c.id LIMIT 1"
                ))
                .bind(prefix.chars().count() as i64)
                .bind(prefix),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// All containers, unjoined.
    pub async fn list_containers(&self) -> RegistryResult<Vec<Container>> {
        self.read(Statement::new(format!(
            "SELECT {CONTAINER_COLUMNS} FROM containers c ORDER BY c.service, c.started_at, c.id"
        )))
        .await
    }
}

fn container_upsert(container: &Container) -> RegistryResult<Statement> {
    validate_id(&container.id)?;
    validate_name(&container.service)?;
    validate_id(&container.server_id)?;
    validate_ip(&container.ip)?;
    if let Some(instance) = &container.instance_id {
        validate_id(instance)?;
    }
    Ok(Statement::new(
        "INSERT OR REPLACE INTO containers \
         (id, service, server_id, ip, healthy, started_at, instance_id, unhealthy_since) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&container.id)
    .bind(&container.service)
    .bind(&container.server_id)
    .bind(&container.ip)
    .bind(container.healthy)
    .bind(container.started_at)
    .bind(container.instance_id.as_deref())
    .bind(container.unhealthy_since))
}
