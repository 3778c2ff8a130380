//! Registry table definitions.
//!
//! Every table is keyed by its primary key and written with
//! `INSERT OR REPLACE`, so the last writer for an id wins.

/// DDL for the three registry tables.
pub const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS servers (
    id TEXT NOT NULL PRIMARY KEY,
    hostname TEXT NOT NULL,
    subnet TEXT NOT NULL,
    overlay_ip TEXT NOT NULL,
    overlay_pubkey TEXT NOT NULL,
    management_ip TEXT NOT NULL,
    endpoints TEXT NOT NULL DEFAULT '[]',
    last_seen INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS services (
    name TEXT NOT NULL PRIMARY KEY,
    project TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS containers (
    id TEXT NOT NULL PRIMARY KEY,
    service TEXT NOT NULL,
    server_id TEXT NOT NULL,
    ip TEXT NOT NULL,
    healthy INTEGER NOT NULL DEFAULT 1,
    started_at INTEGER NOT NULL,
    instance_id TEXT,
    unhealthy_since INTEGER
);
CREATE INDEX IF NOT EXISTS containers_service ON containers (service);
CREATE INDEX IF NOT EXISTS containers_server ON containers (server_id);
";

/// Column lists in the order the row parsers expect.
pub(crate) const SERVER_COLUMNS: &str =
    "id, hostname, subnet, overlay_ip, overlay_pubkey, management_ip, endpoints, last_seen";
pub(crate) const CONTAINER_COLUMNS: &str =
    "c.id, c.service, c.server_id, c.ip, c.healthy, c.started_at, c.instance_id, c.unhealthy_since";

pub fn schema_sql() -> &'static str {
    SCHEMA
}
