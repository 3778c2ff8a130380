//! Domain types shared across Jiji crates.
//!
//! These mirror the rows of the replicated service registry (servers,
//! services, containers). Timestamps are unix epochs: `last_seen` in
//! seconds, container timestamps in milliseconds.

use serde::{Deserialize, Serialize};

/// Opaque, stable identifier of a cluster server.
pub type ServerId = String;

/// Engine-assigned container identifier.
pub type ContainerId = String;

// ── Server ────────────────────────────────────────────────────────

/// A cluster member as recorded in the `servers` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub id: ServerId,
    pub hostname: String,
    /// Overlay subnet assigned to this server (CIDR).
    pub subnet: String,
    pub overlay_ip: String,
    pub overlay_pubkey: String,
    pub management_ip: String,
    /// Reachable WireGuard endpoints (`ip:port`).
    pub endpoints: Vec<String>,
    /// Unix timestamp (seconds) of the last heartbeat.
    pub last_seen: u64,
}

// ── Service ───────────────────────────────────────────────────────

/// A named service within a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    pub project: String,
}

// ── Container ─────────────────────────────────────────────────────

/// A running container registered for service discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Container {
    pub id: ContainerId,
    pub service: String,
    pub server_id: ServerId,
    /// Overlay IP the container answers on.
    pub ip: String,
    pub healthy: bool,
    /// Unix timestamp (milliseconds) when the container started.
    pub started_at: u64,
    /// Replica identifier; enables a per-replica DNS name.
    pub instance_id: Option<String>,
    /// Unix timestamp (milliseconds) of the healthy → unhealthy transition.
    pub unhealthy_since: Option<u64>,
}

impl Container {
    /// Build a freshly started, healthy container record.
    pub fn new(id: &str, service: &str, server_id: &str, ip: &str, started_at: u64) -> Self {
        Self {
            id: id.to_string(),
            service: service.to_string(),
            server_id: server_id.to_string(),
            ip: ip.to_string(),
            healthy: true,
            started_at,
            instance_id: None,
            unhealthy_since: None,
        }
    }

    /// Attach a replica identifier.
    pub fn with_instance_id(mut self, instance_id: &str) -> Self {
        self.instance_id = Some(instance_id.to_string());
        self
    }
}

/// A container row joined with the hostname of the server it runs on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerDetails {
    #[serde(flatten)]
    pub container: Container,
    /// `None` when the referenced server row is missing.
    pub server_hostname: Option<String>,
}

/// Service DNS names served by the overlay resolver.
pub fn service_dns_name(service: &str, domain: &str) -> String {
    format!("{service}.{domain}")
}

/// Per-replica DNS name, e.g. `api-2.jiji`.
pub fn instance_dns_name(service: &str, instance_id: &str, domain: &str) -> String {
    format!("{service}-{instance_id}.{domain}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_container_is_healthy() {
        let c = Container::new("abc123", "api", "srv-1", "10.210.1.5", 1_700_000_000_000);
        assert!(c.healthy);
        assert!(c.instance_id.is_none());
        assert!(c.unhealthy_since.is_none());
    }

    #[test]
    fn dns_names() {
        assert_eq!(service_dns_name("api", "jiji"), "api.jiji");
        assert_eq!(instance_dns_name("api", "2", "jiji"), "api-2.jiji");
    }

    #[test]
    fn details_serialize_flat() {
        let details = ContainerDetails {
            container: Container::new("abc", "api", "srv-1", "10.0.0.2", 5),
            server_hostname: Some("web-1".to_string()),
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["server_hostname"], "web-1");
    }
}
