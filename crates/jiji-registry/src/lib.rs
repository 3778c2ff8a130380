//! jiji-registry: typed client over the replicated service registry.
//!
//! The registry is an embedded SQL store replicated between cluster
//! members by gossip. Jiji never links against it; it shells into the
//! store's CLI on a reachable host:
//!
//! ```text
//! ServiceRegistry ──► RegistryClient ──► <binary> query|exec --config <path> <sql>
//!       │                   │                    (first reachable host wins)
//!       │                   └── Statement::render (bound, quoted literals)
//!       ├── DnsProjection (best-effort host hooks)
//!       ├── gc: stale/offline queries, GcPlan, execute_plan
//!       └── Topology (servers by id / hostname / subnet)
//! ```

pub mod client;
pub mod dns;
pub mod error;
pub mod gc;
pub mod registry;
pub mod rows;
pub mod schema;
pub mod sql;
pub mod topology;

pub use client::RegistryClient;
pub use dns::{CommandDnsProjection, DnsProjection, DnsRecord, container_records};
pub use error::{RegistryError, RegistryResult};
pub use gc::{
    GcCandidate, GcFailure, GcMode, GcPlan, GcReason, GcReport, OfflineServer, StaleContainer,
    execute_plan,
};
pub use registry::ServiceRegistry;
pub use rows::{FromRow, RowParseError, parse_rows};
pub use schema::schema_sql;
pub use sql::{BindError, SqlValue, Statement};
pub use topology::Topology;
