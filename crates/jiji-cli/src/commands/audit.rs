//! `jiji audit`: merged audit trail.

use anyhow::Result;
use tracing::warn;

use jiji_audit::{AuditEntry, AuditQuery, AuditReader, AuditStatus};

use super::{Session, print_json};
use crate::GlobalArgs;

pub async fn show(
    args: &GlobalArgs,
    limit: usize,
    status: Option<AuditStatus>,
    action: Option<String>,
) -> Result<()> {
    let session = Session::load(args)?;
    let ctx = session.connect().await?;
    let query = AuditQuery {
        limit: Some(limit),
        status,
        action,
    };

    ctx.scoped(|ctx| async move {
        let reader = AuditReader::new(&session.config).with_concurrency(ctx.command_concurrency());
        let log = reader.read_all(ctx.shells(), &query).await;

        for failure in &log.host_errors {
            warn!(host = %failure.host, error = %failure.error, "could not read audit log");
        }
        if log.skipped > 0 {
            warn!(skipped = log.skipped, "ignored malformed audit lines");
        }

        if session.json {
            return print_json(&log);
        }
        if log.entries.is_empty() {
            println!("No audit entries");
        }
        for entry in &log.entries {
            println!("{}", render(entry));
        }
        Ok(())
    })
    .await
}

/// One entry per line, tagged with the host it came from; details stay on
/// their own indented line.
fn render(entry: &AuditEntry) -> String {
    let host = entry.host.as_deref().unwrap_or("?");
    format!("{host:<16} {}", entry.format_line())
}
