//! Per-invocation execution context.
//!
//! One `ExecutionContext` is built for each command run. It owns the
//! connections to the targeted hosts and the control-socket directory;
//! nothing is kept in module-level state. [`ExecutionContext::scoped`]
//! closes every connection on all exit paths of the wrapped work.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, warn};

use jiji_core::config::SshConfig;

use crate::error::{RemoteError, RemoteResult};
use crate::fanout::HostFailure;
use crate::pool::{ConnectionPool, Connections};
use crate::retry::RetryPolicy;
use crate::shell::{LocalShell, RemoteShell, is_local_host};
use crate::ssh::SshOptions;

pub struct ExecutionContext {
    shells: Vec<Arc<dyn RemoteShell>>,
    unreachable: Vec<HostFailure>,
    command_concurrency: usize,
    /// Keeps the ssh control sockets alive for the lifetime of the context.
    _control_dir: Option<TempDir>,
}

impl ExecutionContext {
    /// Wrap already-connected shells (local hosts, tests).
    pub fn new(shells: Vec<Arc<dyn RemoteShell>>, command_concurrency: usize) -> Self {
        Self {
            shells,
            unreachable: Vec::new(),
            command_concurrency: command_concurrency.max(1),
            _control_dir: None,
        }
    }

    /// Connect to `hosts` over SSH; `localhost` targets run locally.
    ///
    /// Unreachable hosts are tolerated unless `require_all_hosts` is set;
    /// it is an error when no host at all can be reached.
    pub async fn connect(hosts: &[String], ssh: &SshConfig) -> RemoteResult<Self> {
        let control_dir = tempfile::Builder::new()
            .prefix("jiji-ssh-")
            .tempdir()
            .map_err(|e| RemoteError::Spawn {
                host: "localhost".to_string(),
                program: "mkdtemp".to_string(),
                message: e.to_string(),
            })?;

        let (local, remote): (Vec<String>, Vec<String>) =
            hosts.iter().cloned().partition(|h| is_local_host(h));

        let mut connections = if remote.is_empty() {
            Connections::default()
        } else {
            ConnectionPool::new(SshOptions::from(ssh), control_dir.path())
                .with_max_concurrent(ssh.max_concurrent_connections)
                .with_retry(RetryPolicy::default().with_attempts(ssh.connect_retries))
                .connect_all(&remote)
                .await
        };
        for host in local {
            let mut shell = LocalShell::new(host);
            if let Some(secs) = ssh.command_timeout_secs {
                shell = shell.with_default_timeout(Duration::from_secs(secs));
            }
            connections.shells.push(Arc::new(shell));
        }
        connections
            .shells
            .sort_by_key(|s| hosts.iter().position(|h| h == s.host()));

        let ctx = Self {
            shells: connections.shells,
            unreachable: connections.failures,
            command_concurrency: ssh.command_concurrency.max(1),
            _control_dir: Some(control_dir),
        };

        if ctx.shells.is_empty() || (ssh.require_all_hosts && !ctx.unreachable.is_empty()) {
            let hosts = ctx.unreachable.iter().map(|f| f.host.clone()).collect();
            ctx.close().await;
            return Err(RemoteError::NoReachableHosts { hosts });
        }
        Ok(ctx)
    }

    /// Run `work` with this context, then close every connection whether
    /// `work` succeeded or not.
    pub async fn scoped<T, F, Fut>(self, work: F) -> T
    where
        F: FnOnce(Arc<ExecutionContext>) -> Fut,
        Fut: Future<Output = T>,
    {
        let ctx = Arc::new(self);
        let output = work(Arc::clone(&ctx)).await;
        ctx.close().await;
        output
    }

    pub fn shells(&self) -> &[Arc<dyn RemoteShell>] {
        &self.shells
    }

    pub fn shell(&self, host: &str) -> Option<&Arc<dyn RemoteShell>> {
        self.shells.iter().find(|s| s.host() == host)
    }

    /// Connected shells for the given hosts, in the requested order.
    pub fn select(&self, hosts: &[String]) -> Vec<Arc<dyn RemoteShell>> {
        hosts
            .iter()
            .filter_map(|h| self.shell(h).cloned())
            .collect()
    }

    pub fn hosts(&self) -> Vec<String> {
        self.shells.iter().map(|s| s.host().to_string()).collect()
    }

    /// Hosts that could not be connected, with the reason.
    pub fn unreachable(&self) -> &[HostFailure] {
        &self.unreachable
    }

    pub fn command_concurrency(&self) -> usize {
        self.command_concurrency
    }

    pub async fn close(&self) {
        for shell in &self.shells {
            shell.close().await;
        }
        debug!(hosts = self.shells.len(), "execution context closed");
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if !self.unreachable.is_empty() {
            warn!(
                unreachable = self.unreachable.len(),
                "execution context finished with unreachable hosts"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockShell;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ClosingShell {
        closed: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl RemoteShell for ClosingShell {
        fn host(&self) -> &str {
            "h1"
        }

        async fn execute(
            &self,
            _command: &crate::command::RemoteCommand,
        ) -> RemoteResult<crate::command::CommandOutput> {
            Ok(crate::command::CommandOutput::ok(""))
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn scoped_closes_on_error_path() {
        let closed = Arc::new(AtomicBool::new(false));
        let shell: Arc<dyn RemoteShell> = Arc::new(ClosingShell {
            closed: Arc::clone(&closed),
        });
        let ctx = ExecutionContext::new(vec![shell], 4);

        let result: Result<(), &str> = ctx.scoped(|_ctx| async { Err("work failed") }).await;

        assert!(result.is_err());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn localhost_targets_skip_ssh() {
        let hosts = vec!["localhost".to_string(), "127.0.0.1".to_string()];
        let ctx = ExecutionContext::connect(&hosts, &SshConfig::default()).await.unwrap();
        assert_eq!(ctx.hosts(), hosts);
        assert!(ctx.unreachable().is_empty());
        let out = ctx.shells()[0]
            .run(&crate::command::RemoteCommand::shell("echo hi"))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hi");
    }

    #[test]
    fn select_preserves_requested_order() {
        let shells: Vec<Arc<dyn RemoteShell>> = vec![
            Arc::new(MockShell::ok("a")),
            Arc::new(MockShell::ok("b")),
            Arc::new(MockShell::ok("c")),
        ];
        let ctx = ExecutionContext::new(shells, 0);
        let picked = ctx.select(&["c".to_string(), "x".to_string(), "a".to_string()]);
        let hosts: Vec<_> = picked.iter().map(|s| s.host().to_string()).collect();
        assert_eq!(hosts, vec!["c", "a"]);
        assert_eq!(ctx.command_concurrency(), 1);
    }
}
