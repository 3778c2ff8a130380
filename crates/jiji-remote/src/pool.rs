//! Connection pool: bounded, retrying connection establishment.
//!
//! Connecting to a large fleet at once can exhaust local file descriptors
//! or trip rate limits on bastions, so at most `max_concurrent` connection
//! attempts run at a time. Each host retries independently with its own
//! backoff; one slow host does not hold up the others beyond its permit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::fanout::HostFailure;
use crate::retry::{RetryPolicy, with_retry};
use crate::shell::RemoteShell;
use crate::ssh::{SshOptions, SshShell};

/// Default cap on simultaneous connection attempts.
pub const DEFAULT_MAX_CONCURRENT_CONNECTIONS: usize = 30;

/// Outcome of connecting to a set of hosts.
#[derive(Default)]
pub struct Connections {
    /// Connected shells in the order hosts were requested.
    pub shells: Vec<Arc<dyn RemoteShell>>,
    pub failures: Vec<HostFailure>,
}

impl Connections {
    pub fn connected_hosts(&self) -> Vec<String> {
        self.shells.iter().map(|s| s.host().to_string()).collect()
    }
}

/// Establishes SSH connections with bounded concurrency.
pub struct ConnectionPool {
    options: SshOptions,
    retry: RetryPolicy,
    max_concurrent: usize,
    control_dir: PathBuf,
}

impl ConnectionPool {
    /// Create a pool placing control sockets in `control_dir`.
    pub fn new(options: SshOptions, control_dir: &Path) -> Self {
        Self {
            options,
            retry: RetryPolicy::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT_CONNECTIONS,
            control_dir: control_dir.to_path_buf(),
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Connect to every host. Failures are collected, never fatal here.
    pub async fn connect_all(&self, hosts: &[String]) -> Connections {
        let permits = Arc::new(Semaphore::new(self.max_concurrent));

        let attempts = hosts.iter().map(|host| {
            let permits = Arc::clone(&permits);
            let shell = SshShell::new(host.clone(), self.options.clone(), &self.control_dir);
            async move {
                // The semaphore is never closed, so acquire cannot fail.
                let _permit = permits.acquire_owned().await.ok();
                let result = with_retry(&self.retry, || shell.connect()).await;
                (shell, result)
            }
        });

        let mut connections = Connections {
            shells: Vec::with_capacity(hosts.len()),
            failures: Vec::new(),
        };
        for (shell, result) in join_all(attempts).await {
            match result {
                Ok(()) => connections.shells.push(Arc::new(shell)),
                Err(error) => {
                    warn!(host = %shell.host(), %error, "host unreachable");
                    connections.failures.push(HostFailure {
                        host: shell.host().to_string(),
                        error,
                    });
                }
            }
        }

        info!(
            connected = connections.shells.len(),
            failed = connections.failures.len(),
            "connection pool settled"
        );
        connections
    }
}
