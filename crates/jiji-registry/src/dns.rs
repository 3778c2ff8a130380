//! DNS projection of registered containers.
//!
//! Each host keeps a local name table derived from the registry. Container
//! registration pushes `<service>.<domain>` (and `<service>-<instance>.<domain>`
//! when the container has an instance id) to the host and asks it to
//! regenerate. Projection is best-effort: the registry never fails because
//! a DNS hook did.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use jiji_core::config::DnsConfig;
use jiji_core::{Container, instance_dns_name, service_dns_name};
use jiji_remote::{RemoteCommand, RemoteResult, RemoteShell, shell_quote};

/// A name → address mapping projected onto hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsRecord {
    pub name: String,
    pub ip: String,
}

/// Names a container answers to.
pub fn container_records(container: &Container, domain: &str) -> Vec<DnsRecord> {
    let mut records = vec![DnsRecord {
        name: service_dns_name(&container.service, domain),
        ip: container.ip.clone(),
    }];
    if let Some(instance) = &container.instance_id {
        records.push(DnsRecord {
            name: instance_dns_name(&container.service, instance, domain),
            ip: container.ip.clone(),
        });
    }
    records
}

/// Host-side hooks that maintain the local name table.
#[async_trait]
pub trait DnsProjection: Send + Sync {
    async fn register_hostname(&self, shell: &dyn RemoteShell, record: &DnsRecord) -> RemoteResult<()>;

    async fn unregister_hostname(&self, shell: &dyn RemoteShell, record: &DnsRecord) -> RemoteResult<()>;

    async fn regenerate_hosts(&self, shell: &dyn RemoteShell) -> RemoteResult<()>;
}

/// Runs the commands configured under `[dns]` on the host.
#[derive(Debug, Clone, Default)]
pub struct CommandDnsProjection {
    register: Option<String>,
    unregister: Option<String>,
    regenerate: Option<String>,
}

impl CommandDnsProjection {
    pub fn new(config: &DnsConfig) -> Self {
        Self {
            register: config.register_command.clone(),
            unregister: config.unregister_command.clone(),
            regenerate: config.regenerate_command.clone(),
        }
    }

    async fn run_hook(
        &self,
        shell: &dyn RemoteShell,
        hook: Option<&str>,
        args: &[&str],
    ) -> RemoteResult<()> {
        let Some(hook) = hook else {
            return Ok(());
        };
        let mut script = hook.to_string();
        for arg in args {
            script.push(' ');
            script.push_str(&shell_quote(arg));
        }
        shell.run(&RemoteCommand::shell(script)).await?;
        Ok(())
    }
}

#[async_trait]
impl DnsProjection for CommandDnsProjection {
    async fn register_hostname(&self, shell: &dyn RemoteShell, record: &DnsRecord) -> RemoteResult<()> {
        self.run_hook(shell, self.register.as_deref(), &[record.name.as_str(), record.ip.as_str()])
            .await
    }

    async fn unregister_hostname(&self, shell: &dyn RemoteShell, record: &DnsRecord) -> RemoteResult<()> {
        self.run_hook(shell, self.unregister.as_deref(), &[record.name.as_str(), record.ip.as_str()])
            .await
    }

    async fn regenerate_hosts(&self, shell: &dyn RemoteShell) -> RemoteResult<()> {
        self.run_hook(shell, self.regenerate.as_deref(), &[]).await
    }
}

/// Register `records` on the host and regenerate its table. Errors are
/// logged and dropped.
pub(crate) async fn project(dns: &dyn DnsProjection, shell: &dyn RemoteShell, records: &[DnsRecord]) {
    for record in records {
        if let Err(error) = dns.register_hostname(shell, record).await {
            warn!(host = %shell.host(), name = %record.name, %error, "dns registration failed");
        }
    }
    regenerate(dns, shell).await;
}

/// Remove `records` from the host and regenerate its table. Errors are
/// logged and dropped.
pub(crate) async fn retract(dns: &dyn DnsProjection, shell: &dyn RemoteShell, records: &[DnsRecord]) {
    for record in records {
        if let Err(error) = dns.unregister_hostname(shell, record).await {
            warn!(host = %shell.host(), name = %record.name, %error, "dns unregistration failed");
        }
    }
    regenerate(dns, shell).await;
}

async fn regenerate(dns: &dyn DnsProjection, shell: &dyn RemoteShell) {
    match dns.regenerate_hosts(shell).await {
        Ok(()) => debug!(host = %shell.host(), "dns hosts regenerated"),
        Err(error) => warn!(host = %shell.host(), %error, "dns regeneration failed"),
    }
}
