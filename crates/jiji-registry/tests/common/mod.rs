//! An in-memory stand-in for the registry CLI.
//!
//! `MockShell` handlers answer `<binary> query|exec --config <path> <sql>`
//! by running the SQL against SQLite and printing rows the way the real
//! CLI does: `|`-separated columns, NULL as an empty field. Any other
//! command (DNS hooks) succeeds silently.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use jiji_core::JijiConfig;
use jiji_registry::{ServiceRegistry, schema_sql};
use jiji_remote::{CommandOutput, MockShell, RemoteCommand, RemoteShell};
use rusqlite::Connection;
use rusqlite::types::ValueRef;

#[derive(Clone)]
pub struct RegistryDb {
    conn: Arc<Mutex<Connection>>,
}

impl RegistryDb {
    pub fn new() -> Self {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(schema_sql()).unwrap();
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// A host whose registry CLI is backed by this database.
    pub fn shell(&self, host: &str) -> Arc<dyn RemoteShell> {
        self.mock(host)
    }

    /// Same as [`RegistryDb::shell`], keeping access to the recorded calls.
    pub fn mock(&self, host: &str) -> Arc<MockShell> {
        let db = self.clone();
        Arc::new(MockShell::new(host, move |cmd| Ok(db.answer(cmd))))
    }

    pub fn count(&self, sql: &str) -> i64 {
        let conn = self.conn.lock().unwrap();
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    pub fn execute(&self, sql: &str) {
        self.conn.lock().unwrap().execute_batch(sql).unwrap();
    }

    /// Run one registry CLI invocation against this database.
    pub fn answer(&self, cmd: &RemoteCommand) -> CommandOutput {
        let [mode, flag, _config, sql] = cmd.args.as_slice() else {
            return CommandOutput::ok("");
        };
        if flag != "--config" {
            return CommandOutput::ok("");
        }
        let conn = self.conn.lock().unwrap();
        let result = match mode.as_str() {
            "query" => query(&conn, sql),
            "exec" => conn.execute_batch(sql).map(|()| String::new()),
            other => return CommandOutput::failed(2, format!("unknown subcommand {other}")),
        };
        match result {
            Ok(stdout) => CommandOutput::ok(stdout),
            Err(e) => CommandOutput::failed(1, e.to_string()),
        }
    }
}

fn query(conn: &Connection, sql: &str) -> rusqlite::Result<String> {
    let mut stmt = conn.prepare(sql)?;
    let columns = stmt.column_count();
    let mut rows = stmt.query([])?;
    let mut out = String::new();
    while let Some(row) = rows.next()? {
        let mut fields = Vec::with_capacity(columns);
        for i in 0..columns {
            fields.push(match row.get_ref(i)? {
                ValueRef::Null => String::new(),
                ValueRef::Integer(n) => n.to_string(),
                ValueRef::Real(f) => f.to_string(),
                ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
            });
        }
        out.push_str(&fields.join("|"));
        out.push('\n');
    }
    Ok(out)
}

pub fn config() -> JijiConfig {
    r#"
project = "shop"
hosts = ["h1", "h2", "h3"]

[dns]
regenerate_command = "/opt/jiji/dns/update-hosts.sh"
"#
    .parse()
    .unwrap()
}

pub fn registry(shells: Vec<Arc<dyn RemoteShell>>) -> ServiceRegistry {
    ServiceRegistry::new(&config(), shells)
}

/// SQL texts sent to `shell` whose statement starts with `prefix`.
pub fn statements(shell: &MockShell, prefix: &str) -> Vec<String> {
    shell
        .calls()
        .iter()
        .filter_map(|c| c.args.get(3))
        .filter(|sql| sql.starts_with(prefix))
        .cloned()
        .collect()
}
