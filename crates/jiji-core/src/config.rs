//! jiji.toml configuration parser.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validate::{ValidationError, validate_hostname, validate_name};

/// Errors loading or validating `jiji.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("service {service:?} references unknown host {host:?}")]
    UnknownHost { service: String, host: String },

    #[error("unknown service {0:?}")]
    UnknownService(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JijiConfig {
    pub project: String,
    /// Directory (relative to the remote user's home) holding lock and audit files.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub gc: GcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: Option<u64>,
    /// Cap on simultaneous connection attempts.
    pub max_concurrent_connections: usize,
    /// Cap on simultaneous in-flight commands during fanout.
    pub command_concurrency: usize,
    pub connect_retries: u32,
    /// Refuse to run when any targeted host is unreachable.
    pub require_all_hosts: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            identity_file: None,
            connect_timeout_secs: 10,
            command_timeout_secs: None,
            max_concurrent_connections: 30,
            command_concurrency: 30,
            connect_retries: 3,
            require_all_hosts: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry CLI on the remote host (exposes `query` / `exec`).
    pub binary: String,
    pub config_path: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            binary: "/opt/jiji/corrosion/corrosion".to_string(),
            config_path: "/opt/jiji/corrosion/config.toml".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    pub domain: String,
    /// Invoked as `<command> <name> <ip>` on the target host.
    pub register_command: Option<String>,
    /// Invoked as `<command> <name> <ip>` on the target host.
    pub unregister_command: Option<String>,
    pub regenerate_command: Option<String>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            domain: "jiji".to_string(),
            register_command: None,
            unregister_command: None,
            regenerate_command: Some("/opt/jiji/dns/update-hosts.sh".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    pub stale_threshold_secs: u64,
    pub offline_threshold_ms: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            stale_threshold_secs: 3600,
            offline_threshold_ms: 10 * 60 * 1000,
        }
    }
}

fn default_state_dir() -> String {
    ".jiji".to_string()
}

impl JijiConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        content.parse()
    }

    /// Check names and hosts against the allow-lists and make sure every
    /// service points at a declared host.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name(&self.project)?;
        for host in &self.hosts {
            validate_hostname(host)?;
        }
        for (name, svc) in &self.services {
            validate_name(name)?;
            for host in &svc.hosts {
                if !self.hosts.contains(host) {
                    return Err(ConfigError::UnknownHost {
                        service: name.clone(),
                        host: host.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Per-project directory on every host.
    pub fn project_dir(&self) -> String {
        format!("{}/{}", self.state_dir.trim_end_matches('/'), self.project)
    }

    pub fn lock_path(&self) -> String {
        format!("{}/deploy.lock", self.project_dir())
    }

    pub fn audit_log_path(&self) -> String {
        format!("{}/audit.log", self.project_dir())
    }

    /// Resolve the hosts a command should touch.
    ///
    /// Services narrow to the union of their hosts; explicit hosts narrow
    /// further. Declaration order is preserved and duplicates dropped.
    pub fn target_hosts(
        &self,
        hosts: &[String],
        services: &[String],
    ) -> Result<Vec<String>, ConfigError> {
        let mut candidates: Vec<String> = if services.is_empty() {
            self.hosts.clone()
        } else {
            let mut out = Vec::new();
            for name in services {
                let svc = self
                    .services
                    .get(name)
                    .ok_or_else(|| ConfigError::UnknownService(name.clone()))?;
                out.extend(svc.hosts.iter().cloned());
            }
            out
        };

        if !hosts.is_empty() {
            for host in hosts {
                validate_hostname(host)?;
            }
            candidates.retain(|h| hosts.contains(h));
            // Hosts named explicitly but absent from the config are still targeted.
            if services.is_empty() {
                for host in hosts {
                    if !candidates.contains(host) {
                        candidates.push(host.clone());
                    }
                }
            }
        }

        let mut seen = Vec::with_capacity(candidates.len());
        for host in candidates {
            if !seen.contains(&host) {
                seen.push(host);
            }
        }
        Ok(seen)
    }
}

impl std::str::FromStr for JijiConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: JijiConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
project = "shop"
hosts = ["web-1", "web-2", "db-1"]

[ssh]
user = "deploy"
max_concurrent_connections = 10

[services.api]
hosts = ["web-1", "web-2"]

[services.postgres]
hosts = ["db-1"]
"#;

    #[test]
    fn test_parse_minimal() {
        let config: JijiConfig = "project = \"shop\"".parse().unwrap();
        assert_eq!(config.project, "shop");
        assert_eq!(config.state_dir, ".jiji");
        assert_eq!(config.ssh.max_concurrent_connections, 30);
        assert_eq!(config.registry.binary, "/opt/jiji/corrosion/corrosion");
        assert_eq!(config.dns.domain, "jiji");
    }

    #[test]
    fn test_parse_sample() {
        let config: JijiConfig = SAMPLE.parse().unwrap();
        assert_eq!(config.ssh.user, "deploy");
        assert_eq!(config.ssh.port, 22);
        assert_eq!(config.ssh.max_concurrent_connections, 10);
        assert_eq!(config.services["api"].hosts.len(), 2);
    }

    #[test]
    fn test_paths_are_project_scoped() {
        let config: JijiConfig = SAMPLE.parse().unwrap();
        assert_eq!(config.lock_path(), ".jiji/shop/deploy.lock");
        assert_eq!(config.audit_log_path(), ".jiji/shop/audit.log");
    }

    #[test]
    fn test_rejects_unknown_service_host() {
        let toml_str = r#"
project = "shop"
hosts = ["web-1"]
[services.api]
hosts = ["web-9"]
"#;
        let err = toml_str.parse::<JijiConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownHost { .. }));
    }

    #[test]
    fn test_rejects_bad_project_name() {
        let err = "project = \"shop; rm -rf /\"".parse::<JijiConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_target_hosts() {
        let config: JijiConfig = SAMPLE.parse().unwrap();

        let all = config.target_hosts(&[], &[]).unwrap();
        assert_eq!(all, vec!["web-1", "web-2", "db-1"]);

        let api = config.target_hosts(&[], &["api".to_string()]).unwrap();
        assert_eq!(api, vec!["web-1", "web-2"]);

        let narrowed = config
            .target_hosts(&["web-2".to_string()], &["api".to_string()])
            .unwrap();
        assert_eq!(narrowed, vec!["web-2"]);

        let both = config
            .target_hosts(&[], &["api".to_string(), "api".to_string()])
            .unwrap();
        assert_eq!(both, vec!["web-1", "web-2"]);

        assert!(config.target_hosts(&[], &["nope".to_string()]).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jiji.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = JijiConfig::from_file(&path).unwrap();
        assert_eq!(config.hosts.len(), 3);

        let missing = JijiConfig::from_file(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
