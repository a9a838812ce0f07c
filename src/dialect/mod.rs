//! Dialect boundary.
//!
//! A dialect is a backend-specific implementation of the uniform operation set. Schemas hold
//! one dialect (shared, `Send + Sync`) and open a [`DialectClient`] per unit of work. Clients
//! are owned by exactly one unit of work and are deliberately not `Send`.

pub mod postgres;
pub mod remote;
pub mod retry;

pub use retry::{RetryBudget, RetryPolicy};

use crate::define::{ColumnDefine, TableDefine};
use crate::error::Result;
use crate::query::{Condition, QueryInfo};
use crate::row::Row;
use crate::schema::transaction::TransactionConfig;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Storage family a schema serves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialectType {
    Relational,
    Distribute,
    Graph,
    Timescale,
    Remote,
    #[default]
    Default,
}

impl fmt::Display for DialectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialectType::Relational => "relational",
            DialectType::Distribute => "distribute",
            DialectType::Graph => "graph",
            DialectType::Timescale => "timescale",
            DialectType::Remote => "remote",
            DialectType::Default => "default",
        };
        f.write_str(name)
    }
}

/// Where an operation lands after sharding resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoutingKey {
    /// Physical database; the table keeps its logical name.
    Database(String),
    /// Physical table (or collection) name in the default database.
    Table(String),
}

impl RoutingKey {
    pub fn database(&self) -> Option<&str> {
        match self {
            RoutingKey::Database(database) => Some(database),
            RoutingKey::Table(_) => None,
        }
    }

    pub fn physical_table<'a>(&'a self, define: &'a TableDefine) -> &'a str {
        match self {
            RoutingKey::Database(_) => define.name(),
            RoutingKey::Table(table) => table,
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingKey::Database(database) => write!(f, "database {database}"),
            RoutingKey::Table(table) => write!(f, "table {table}"),
        }
    }
}

/// Client bound to one unit of work.
///
/// Filters always arrive as condition lists; the dispatch layer turns filter maps into
/// equality conditions before calling in.
pub trait DialectClient {
    fn begin_transaction(&mut self, config: &TransactionConfig) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Release every backend resource. An open transaction is rolled back first.
    fn close(&mut self) -> Result<()>;

    /// Register sharded tables once per schema initialisation.
    fn init_sharding(&mut self, tables: &[Arc<TableDefine>]) -> Result<()>;

    /// Create the table (and its indexes) if it does not exist.
    fn init_table(&mut self, route: &RoutingKey, define: &TableDefine) -> Result<()>;

    /// Columns the live store reports for the routed table. Empty when it does not exist.
    fn table_columns(&mut self, route: &RoutingKey, define: &TableDefine)
        -> Result<Vec<ColumnDefine>>;

    /// Insert and return the stored row.
    fn insert(&mut self, route: &RoutingKey, define: &TableDefine, data: &Row) -> Result<Row>;

    /// First matching row, or an empty map.
    fn retrieve(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        filter: &[Condition],
        columns: &[String],
    ) -> Result<Row>;

    fn update(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        data: &Row,
        filter: &[Condition],
    ) -> Result<u64>;

    fn delete(&mut self, route: &RoutingKey, define: &TableDefine, filter: &[Condition])
        -> Result<u64>;

    /// Lock the matching records for the enclosing transaction. Returns whether any matched.
    fn lock_record(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        filter: &[Condition],
    ) -> Result<bool>;

    fn query(&mut self, route: &RoutingKey, define: &TableDefine, info: &QueryInfo)
        -> Result<Vec<Row>>;

    fn query_for_update(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        filter: &[Condition],
        columns: &[String],
    ) -> Result<Vec<Row>>;

    /// Row count of `info`, ignoring its paging and ordering.
    fn query_total(&mut self, route: &RoutingKey, define: &TableDefine, info: &QueryInfo)
        -> Result<u64>;

    fn truncate_table(&mut self, route: &RoutingKey, define: &TableDefine) -> Result<()>;

    fn truncate_tables(&mut self, targets: &[(RoutingKey, Arc<TableDefine>)]) -> Result<()> {
        for (route, define) in targets {
            self.truncate_table(route, define)?;
        }
        Ok(())
    }

    fn drop_table(&mut self, route: &RoutingKey, define: &TableDefine) -> Result<()>;

    fn drop_tables(&mut self, targets: &[(RoutingKey, Arc<TableDefine>)]) -> Result<()> {
        for (route, define) in targets {
            self.drop_table(route, define)?;
        }
        Ok(())
    }
}

/// Dialect behind the session families (relational, distribute, graph, timescale).
pub trait Dialect: Send + Sync {
    /// Open a client. Backend connections may be acquired lazily on first use.
    fn open(&self) -> Result<Box<dyn DialectClient>>;

    /// Retry budget for transient connection-acquisition failures. `count = 0` disables it.
    fn config_retry(&self, count: u32, period: Duration);

    fn close(&self) -> Result<()>;
}
