//! Typed parsers for pipe-delimited registry output.
//!
//! The registry CLI prints one row per line with columns separated by `|`
//! and NULL rendered as an empty field. Each row type declares its column
//! count and parses from the split fields; anything that does not fit is a
//! [`RowParseError`], never a guessed default.

use thiserror::Error;

use jiji_core::{Container, ContainerDetails, Server, Service};

/// A line of registry output did not match the expected row shape.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed registry row {line}: {reason} ({raw:?})")]
pub struct RowParseError {
    /// 1-based line number in the output.
    pub line: usize,
    pub raw: String,
    pub reason: String,
}

/// A type that can be read from one registry row.
pub trait FromRow: Sized {
    const COLUMNS: usize;

    fn from_columns(cols: &[&str]) -> Result<Self, String>;
}

/// Parse every non-empty line of `output` as a `T`.
pub fn parse_rows<T: FromRow>(output: &str) -> Result<Vec<T>, RowParseError> {
    let mut rows = Vec::new();
    for (idx, raw) in output.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        let fail = |reason: String| RowParseError {
            line: idx + 1,
            raw: raw.to_string(),
            reason,
        };
        let cols: Vec<&str> = raw.split('|').collect();
        if cols.len() != T::COLUMNS {
            return Err(fail(format!(
                "expected {} columns, found {}",
                T::COLUMNS,
                cols.len()
            )));
        }
        rows.push(T::from_columns(&cols).map_err(fail)?);
    }
    Ok(rows)
}

// ── Column helpers ────────────────────────────────────────────────

fn text(cols: &[&str], i: usize) -> String {
    cols[i].to_string()
}

fn opt_text(cols: &[&str], i: usize) -> Option<String> {
    let v = cols[i].trim();
    (!v.is_empty()).then(|| v.to_string())
}

fn int(cols: &[&str], i: usize, name: &str) -> Result<u64, String> {
    let v = cols[i].trim();
    v.parse::<u64>()
        .map_err(|_| format!("{name} is not an unsigned integer: {v:?}"))
}

fn opt_int(cols: &[&str], i: usize, name: &str) -> Result<Option<u64>, String> {
    if cols[i].trim().is_empty() {
        Ok(None)
    } else {
        int(cols, i, name).map(Some)
    }
}

fn flag(cols: &[&str], i: usize, name: &str) -> Result<bool, String> {
    match cols[i].trim() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(format!("{name} is not a boolean: {other:?}")),
    }
}

// ── Row types ─────────────────────────────────────────────────────

/// Single text column (`SELECT ip ...`, `SELECT id ...`).
impl FromRow for String {
    const COLUMNS: usize = 1;

    fn from_columns(cols: &[&str]) -> Result<Self, String> {
        Ok(text(cols, 0))
    }
}

impl FromRow for Service {
    const COLUMNS: usize = 2;

    fn from_columns(cols: &[&str]) -> Result<Self, String> {
        Ok(Service {
            name: text(cols, 0),
            project: text(cols, 1),
        })
    }
}

impl FromRow for Server {
    const COLUMNS: usize = 8;

    fn from_columns(cols: &[&str]) -> Result<Self, String> {
        let endpoints = match cols[6].trim() {
            "" => Vec::new(),
            raw => serde_json::from_str(raw).map_err(|e| format!("endpoints: {e}"))?,
        };
        Ok(Server {
            id: text(cols, 0),
            hostname: text(cols, 1),
            subnet: text(cols, 2),
            overlay_ip: text(cols, 3),
            overlay_pubkey: text(cols, 4),
            management_ip: text(cols, 5),
            endpoints,
            last_seen: int(cols, 7, "last_seen")?,
        })
    }
}

impl FromRow for Container {
    const COLUMNS: usize = 8;

    fn from_columns(cols: &[&str]) -> Result<Self, String> {
        Ok(Container {
            id: text(cols, 0),
            service: text(cols, 1),
            server_id: text(cols, 2),
            ip: text(cols, 3),
            healthy: flag(cols, 4, "healthy")?,
            started_at: int(cols, 5, "started_at")?,
            instance_id: opt_text(cols, 6),
            unhealthy_since: opt_int(cols, 7, "unhealthy_since")?,
        })
    }
}

/// Container columns followed by the joined server hostname.
impl FromRow for ContainerDetails {
    const COLUMNS: usize = Container::COLUMNS + 1;

    fn from_columns(cols: &[&str]) -> Result<Self, String> {
        Ok(ContainerDetails {
            container: Container::from_columns(&cols[..Container::COLUMNS])?,
            server_hostname: opt_text(cols, Container::COLUMNS),
        })
    }
}
