pub mod audit;
pub mod lock;
pub mod network;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, warn};

use jiji_core::JijiConfig;
use jiji_remote::ExecutionContext;

use crate::GlobalArgs;

/// Config and target hosts resolved for one invocation.
pub struct Session {
    pub config: JijiConfig,
    pub hosts: Vec<String>,
    pub json: bool,
}

impl Session {
    pub fn load(args: &GlobalArgs) -> Result<Self> {
        let config = JijiConfig::from_file(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?;
        let hosts = config.target_hosts(&args.hosts, &args.services)?;
        if hosts.is_empty() {
            bail!("no hosts selected; check --hosts/--services against {}", args.config.display());
        }
        debug!(project = %config.project, ?hosts, "session loaded");
        Ok(Self {
            config,
            hosts,
            json: args.json,
        })
    }

    /// Connect to the target hosts, warning about any that are unreachable.
    pub async fn connect(&self) -> Result<ExecutionContext> {
        let ctx = ExecutionContext::connect(&self.hosts, &self.config.ssh)
            .await
            .context("connecting to hosts")?;
        for failure in ctx.unreachable() {
            warn!(host = %failure.host, error = %failure.error, "skipping unreachable host");
        }
        Ok(ctx)
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Compact duration for tables: `45s`, `12m`, `3h 5m`, `2d 4h`.
pub fn human_duration(ms: u64) -> String {
    let secs = ms / 1000;
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m", secs / 60),
        3600..86400 => match (secs % 3600) / 60 {
            0 => format!("{}h", secs / 3600),
            m => format!("{}h {m}m", secs / 3600),
        },
        _ => match (secs % 86400) / 3600 {
            0 => format!("{}d", secs / 86400),
            h => format!("{}d {h}h", secs / 86400),
        },
    }
}
