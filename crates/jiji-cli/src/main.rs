//! jiji: fleet coordination over SSH.
//!
//! # Usage
//!
//! ```text
//! jiji lock acquire "deploy v2"
//! jiji --hosts web-1,web-2 lock status
//! jiji audit --limit 20 --status failed
//! jiji network gc --force
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use jiji_audit::AuditStatus;

mod commands;

#[derive(Parser)]
#[command(
    name = "jiji",
    about = "Jiji: deploy coordination for SSH-reachable fleets",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every subcommand.
#[derive(clap::Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to jiji.toml
    #[arg(short, long, global = true, default_value = "jiji.toml")]
    pub config: PathBuf,

    /// Only target these hosts (comma separated)
    #[arg(long, global = true, value_delimiter = ',')]
    pub hosts: Vec<String>,

    /// Only target hosts running these services (comma separated)
    #[arg(long, global = true, value_delimiter = ',')]
    pub services: Vec<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the deploy lock
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },
    /// Show the audit trail merged across hosts
    Audit {
        /// Number of most recent entries
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        /// Only entries with this status (started, success, failed, warning)
        #[arg(long)]
        status: Option<AuditStatus>,
        /// Only entries for this action
        #[arg(long)]
        action: Option<String>,
    },
    /// Inspect the service registry
    Network {
        #[command(subcommand)]
        action: NetworkAction,
    },
}

#[derive(Subcommand)]
enum LockAction {
    /// Take the lock on every target host
    Acquire {
        /// Why the lock is held, shown to anyone who hits it
        message: String,
        /// Overwrite an existing lock
        #[arg(long)]
        force: bool,
    },
    /// Remove the lock from every target host
    Release,
    /// Per-host lock state
    Status,
    /// The current holder
    Show,
    /// Release locks left behind by exited local processes
    Cleanup,
}

#[derive(Subcommand)]
enum NetworkAction {
    /// Servers and their containers
    Status,
    /// DNS names projected for healthy containers
    Dns,
    /// Details of one container
    Inspect {
        /// Container id or unique prefix
        id_prefix: String,
    },
    /// Find stale containers and containers of offline servers
    Gc {
        /// Unhealthy for longer than this many seconds counts as stale
        #[arg(long)]
        stale_seconds: Option<u64>,
        /// Silent for longer than this many milliseconds counts as offline
        #[arg(long)]
        offline_ms: Option<u64>,
        /// Actually delete (default is a dry run)
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "warn,jiji=debug" } else { "warn,jiji=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose);
    if std::env::var("JIJI_LOG_FORMAT").is_ok_and(|f| f == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    let result = match cli.command {
        Commands::Lock { action } => match action {
            LockAction::Acquire { message, force } => {
                commands::lock::acquire(&cli.global, &message, force).await
            }
            LockAction::Release => commands::lock::release(&cli.global).await,
            LockAction::Status => commands::lock::status(&cli.global).await,
            LockAction::Show => commands::lock::show(&cli.global).await,
            LockAction::Cleanup => commands::lock::cleanup(&cli.global).await,
        },
        Commands::Audit {
            limit,
            status,
            action,
        } => commands::audit::show(&cli.global, limit, status, action).await,
        Commands::Network { action } => match action {
            NetworkAction::Status => commands::network::status(&cli.global).await,
            NetworkAction::Dns => commands::network::dns(&cli.global).await,
            NetworkAction::Inspect { id_prefix } => {
                commands::network::inspect(&cli.global, &id_prefix).await
            }
            NetworkAction::Gc {
                stale_seconds,
                offline_ms,
                force,
            } => commands::network::gc(&cli.global, stale_seconds, offline_ms, force).await,
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_anywhere() {
        let cli = Cli::try_parse_from([
            "jiji", "lock", "acquire", "deploy v2", "--force", "--hosts", "a,b", "--json",
        ])
        .unwrap();
        assert_eq!(cli.global.hosts, vec!["a", "b"]);
        assert!(cli.global.json);
        assert_eq!(cli.global.config, PathBuf::from("jiji.toml"));
        match cli.command {
            Commands::Lock {
                action: LockAction::Acquire { message, force },
            } => {
                assert_eq!(message, "deploy v2");
                assert!(force);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn audit_filters_parse() {
        let cli = Cli::try_parse_from(["jiji", "audit", "--status", "failed", "-n", "5"]).unwrap();
        match cli.command {
            Commands::Audit { limit, status, action } => {
                assert_eq!(limit, 5);
                assert_eq!(status, Some(AuditStatus::Failed));
                assert!(action.is_none());
            }
            _ => panic!("wrong command"),
        }
        assert!(Cli::try_parse_from(["jiji", "audit", "--status", "bogus"]).is_err());
    }

    #[test]
    fn gc_defaults_to_dry_run() {
        let cli = Cli::try_parse_from(["jiji", "network", "gc"]).unwrap();
        match cli.command {
            Commands::Network {
                action: NetworkAction::Gc { force, stale_seconds, .. },
            } => {
                assert!(!force);
                assert!(stale_seconds.is_none());
            }
            _ => panic!("wrong command"),
        }
    }
}
