//! Scriptable in-process shell for tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::command::{CommandOutput, RemoteCommand};
use crate::error::{RemoteError, RemoteResult};
use crate::shell::RemoteShell;

type Handler = dyn Fn(&RemoteCommand) -> RemoteResult<CommandOutput> + Send + Sync;

/// A shell whose responses come from a closure. Every command is recorded.
pub struct MockShell {
    host: String,
    handler: Box<Handler>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RemoteCommand>>,
}

impl MockShell {
    pub fn new<F>(host: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&RemoteCommand) -> RemoteResult<CommandOutput> + Send + Sync + 'static,
    {
        Self {
            host: host.into(),
            handler: Box::new(handler),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every command succeeds with empty output.
    pub fn ok(host: impl Into<String>) -> Self {
        Self::new(host, |_| Ok(CommandOutput::ok("")))
    }

    /// Every command fails as if the host were down.
    pub fn unreachable(host: impl Into<String>) -> Self {
        let host = host.into();
        let name = host.clone();
        Self::new(host, move |_| {
            Err(RemoteError::Connect {
                host: name.clone(),
                message: "connection refused".to_string(),
            })
        })
    }

    /// Sleep before answering each command.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Commands received so far, in order.
    pub fn calls(&self) -> Vec<RemoteCommand> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl RemoteShell for MockShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute(&self, command: &RemoteCommand) -> RemoteResult<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(command)
    }
}
