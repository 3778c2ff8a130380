//! Cluster membership view built from the `servers` table.

use serde::Serialize;

use jiji_core::Server;
use jiji_core::validate::ipv4_in_cidr;

use crate::error::RegistryResult;
use crate::registry::ServiceRegistry;

/// Servers known to the registry, indexed for display and lookup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Topology {
    servers: Vec<Server>,
}

impl Topology {
    pub fn from_servers(servers: Vec<Server>) -> Self {
        Self { servers }
    }

    pub async fn load(registry: &ServiceRegistry) -> RegistryResult<Self> {
        Ok(Self::from_servers(registry.list_servers().await?))
    }

    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn by_id(&self, id: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn by_hostname(&self, hostname: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.hostname == hostname)
    }

    /// The server whose overlay subnet contains `ip`.
    pub fn server_for_ip(&self, ip: &str) -> Option<&Server> {
        self.servers.iter().find(|s| ipv4_in_cidr(ip, &s.subnet))
    }

    /// `hostname (id)` for known servers, the bare id otherwise.
    pub fn display_name(&self, server_id: &str) -> String {
        match self.by_id(server_id) {
            Some(server) => format!("{} ({})", server.hostname, server.id),
            None => server_id.to_string(),
        }
    }
}
