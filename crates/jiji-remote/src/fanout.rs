//! Host fanout: run the same logical operation on many hosts at once.
//!
//! Every operation is driven to completion; a failure on one host never
//! cancels the others. Each input host ends up in exactly one of
//! `results` or `host_errors`, both in input order. There is no implicit
//! retry: wrap the per-host operation with [`crate::retry::with_retry`]
//! when one is wanted.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::error::RemoteError;
use crate::shell::RemoteShell;

/// Value produced by a host whose operation succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct HostSuccess<T> {
    pub host: String,
    pub value: T,
}

/// A host whose operation failed, with the reason.
#[derive(Debug, Clone)]
pub struct HostFailure<E = RemoteError> {
    pub host: String,
    pub error: E,
}

impl<E: fmt::Display> fmt::Display for HostFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.host, self.error)
    }
}

/// Settled outcome of a fanout.
#[derive(Debug, Clone)]
pub struct FanoutResult<T, E = RemoteError> {
    pub results: Vec<HostSuccess<T>>,
    pub host_errors: Vec<HostFailure<E>>,
}

impl<T, E> Default for FanoutResult<T, E> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            host_errors: Vec::new(),
        }
    }
}

impl<T, E> FanoutResult<T, E> {
    /// Number of hosts that were dispatched.
    pub fn len(&self) -> usize {
        self.results.len() + self.host_errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all_succeeded(&self) -> bool {
        self.host_errors.is_empty()
    }

    pub fn succeeded_hosts(&self) -> Vec<String> {
        self.results.iter().map(|r| r.host.clone()).collect()
    }

    pub fn failed_hosts(&self) -> Vec<String> {
        self.host_errors.iter().map(|f| f.host.clone()).collect()
    }

    /// Values of the successful hosts, in input order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.results.iter().map(|r| &r.value)
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> FanoutResult<U, E> {
        FanoutResult {
            results: self
                .results
                .into_iter()
                .map(|r| HostSuccess {
                    host: r.host,
                    value: f(r.value),
                })
                .collect(),
            host_errors: self.host_errors,
        }
    }
}

/// Drive every `(host, operation)` pair to completion with at most
/// `concurrency` operations in flight.
pub async fn fanout<T, E, Fut>(operations: Vec<(String, Fut)>, concurrency: usize) -> FanoutResult<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let total = operations.len();
    let settled: Vec<(String, Result<T, E>)> = stream::iter(
        operations
            .into_iter()
            .map(|(host, op)| async move { (host, op.await) }),
    )
    .buffered(concurrency.max(1))
    .collect()
    .await;

    let mut out = FanoutResult {
        results: Vec::with_capacity(total),
        host_errors: Vec::new(),
    };
    for (host, result) in settled {
        match result {
            Ok(value) => out.results.push(HostSuccess { host, value }),
            Err(error) => {
                debug!(%host, %error, "fanout operation failed");
                out.host_errors.push(HostFailure { host, error });
            }
        }
    }
    debug!(
        total,
        succeeded = out.results.len(),
        failed = out.host_errors.len(),
        "fanout settled"
    );
    out
}

/// Fan an operation out over a set of connected shells.
pub async fn fanout_shells<T, E, F, Fut>(
    shells: &[Arc<dyn RemoteShell>],
    concurrency: usize,
    op: F,
) -> FanoutResult<T, E>
where
    F: Fn(Arc<dyn RemoteShell>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let operations = shells
        .iter()
        .map(|shell| (shell.host().to_string(), op(Arc::clone(shell))))
        .collect();
    fanout(operations, concurrency).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn op(host: &str, delay_ms: u64, fail: bool) -> Result<String, String> {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        if fail {
            Err(format!("{host} exploded"))
        } else {
            Ok(format!("{host} ok"))
        }
    }

    #[tokio::test]
    async fn partitions_every_host_exactly_once() {
        let ops = vec![
            ("a".to_string(), op("a", 30, false)),
            ("b".to_string(), op("b", 10, true)),
            ("c".to_string(), op("c", 20, false)),
            ("d".to_string(), op("d", 0, true)),
        ];
        let result = fanout(ops, 8).await;

        assert_eq!(result.len(), 4);
        assert_eq!(result.succeeded_hosts(), vec!["a", "c"]);
        assert_eq!(result.failed_hosts(), vec!["b", "d"]);
        for host in ["a", "b", "c", "d"] {
            let in_ok = result.results.iter().filter(|r| r.host == host).count();
            let in_err = result.host_errors.iter().filter(|f| f.host == host).count();
            assert_eq!(in_ok + in_err, 1, "{host} must land in exactly one bucket");
        }
        assert_eq!(result.results[0].value, "a ok");
        assert_eq!(result.host_errors[0].to_string(), "b: b exploded");
    }

    #[tokio::test]
    async fn does_not_short_circuit() {
        let ops = vec![
            ("fast-fail".to_string(), op("fast-fail", 0, true)),
            ("slow-ok".to_string(), op("slow-ok", 50, false)),
        ];
        let result = fanout(ops, 2).await;
        assert!(!result.all_succeeded());
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].host, "slow-ok");
    }

    #[tokio::test]
    async fn preserves_order_under_bounded_concurrency() {
        let ops: Vec<_> = (0..10)
            .map(|i| {
                let host = format!("h{i}");
                let fut = op("x", (10 - i) * 3, false);
                (host, fut)
            })
            .collect();
        let result = fanout(ops, 3).await;
        let hosts = result.succeeded_hosts();
        let expected: Vec<String> = (0..10).map(|i| format!("h{i}")).collect();
        assert_eq!(hosts, expected);
    }

    #[tokio::test]
    async fn empty_input() {
        let ops: Vec<(String, std::future::Ready<Result<(), String>>)> = Vec::new();
        let result = fanout(ops, 4).await;
        assert!(result.is_empty());
        assert!(result.all_succeeded());
    }

    #[tokio::test]
    async fn map_keeps_hosts() {
        let ops = vec![("a".to_string(), op("a", 0, false))];
        let result = fanout(ops, 1).await.map(|s| s.len());
        assert_eq!(result.results[0].host, "a");
        assert_eq!(result.results[0].value, 4);
    }
}
