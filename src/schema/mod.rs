//! Schema dispatch layer.
//!
//! A [`Schema`] is the façade for one storage family. It owns exactly one dialect and the
//! table definitions of that family, and turns every call into a routed dialect-client call:
//! resolve the table, resolve the routing key from the call's own payload, forward, normalise
//! the reply.
//!
//! Data operations are provided methods of the trait; family implementations only decide how
//! clients are opened and how the unit-of-work lifecycle maps onto them.
//!
//! ```ignore
//! let schema = SchemaConfig::load()?.build_schema()?;
//! schema.initialize()?;
//!
//! let mut uow = UnitOfWork::with_transaction(TransactionConfig::default());
//! let order = execute_in(schema.as_ref(), &mut uow, |schema, uow| {
//!     schema.insert(uow, "orders", &row)
//! })?;
//! ```

pub mod context;
pub mod remote;
pub mod session;
pub mod support;
pub mod transaction;

pub use context::{TransactionState, UnitOfWork};
pub use remote::RemoteSchema;
pub use session::SessionSchema;
pub use support::SchemaSupport;
pub use transaction::{IsolationLevel, RollbackPolicy, TransactionConfig};

use crate::define::ValueBag;
use crate::dialect::{DialectClient, DialectType};
use crate::error::{BridgeError, Result};
use crate::query::{filter_conditions, Condition, QueryInfo};
use crate::row::Row;
use serde::Deserialize;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// What `initialize` does to the backing store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DdlMode {
    /// Trust the store as it is.
    #[default]
    None,
    /// Compare declared columns with the live store and fail on drift.
    Validate,
    /// Create missing tables and indexes.
    Create,
    /// Like `Create`, and drop the unsharded tables again on `close`.
    CreateDrop,
}

impl DdlMode {
    pub fn creates(self) -> bool {
        matches!(self, DdlMode::Create | DdlMode::CreateDrop)
    }
}

pub trait Schema {
    fn support(&self) -> &SchemaSupport;

    /// Open a client for a call made outside any bound client. It is closed after the call.
    fn open_client(&self, uow: &UnitOfWork) -> Result<Box<dyn DialectClient>>;

    /// Prepare the backing store according to the DDL mode.
    fn initialize(&self) -> Result<()>;

    fn begin_transaction(&self, uow: &mut UnitOfWork) -> Result<()>;

    fn commit(&self, uow: &mut UnitOfWork) -> Result<()> {
        commit_bound(uow)
    }

    /// Roll back when the unit of work has an active transaction and its policy accepts
    /// `cause`. Otherwise a no-op.
    fn rollback(&self, uow: &mut UnitOfWork, cause: &BridgeError) -> Result<()> {
        rollback_bound(uow, cause)
    }

    /// Release the bound client and return to idle. Never fails; close errors are logged.
    fn clear_transactional(&self, uow: &mut UnitOfWork);

    fn config_retry(&self, count: u32, period: Duration);

    fn close(&self) -> Result<()>;

    fn family(&self) -> DialectType {
        self.support().family()
    }

    fn insert(&self, uow: &mut UnitOfWork, table: &str, data: &Row) -> Result<Row> {
        let define = self.support().table(table)?;
        let data = self.support().prepare_insert(&define, data);
        let route = self.support().route(&define, &ValueBag::from_row(&data))?;
        let row = dispatch(self, uow, "insert", define.name(), |client| {
            client.insert(&route, &define, &data)
        })?;
        Ok(self.support().normalize(&define, row))
    }

    /// First row matching the filter map, or an empty map. `columns` is comma-joined; blank
    /// selects every declared column.
    fn retrieve(&self, uow: &mut UnitOfWork, table: &str, filter: &Row, columns: &str) -> Result<Row> {
        let define = self.support().table(table)?;
        self.retrieve_where(uow, table, &filter_conditions(define.name(), filter), columns)
    }

    fn retrieve_where(
        &self,
        uow: &mut UnitOfWork,
        table: &str,
        conditions: &[Condition],
        columns: &str,
    ) -> Result<Row> {
        let define = self.support().table(table)?;
        let projection = self.support().projection(&define, columns)?;
        let route = self
            .support()
            .route(&define, &ValueBag::from_conditions(conditions))?;
        let row = dispatch(self, uow, "retrieve", define.name(), |client| {
            client.retrieve(&route, &define, conditions, &projection)
        })?;
        Ok(self.support().normalize(&define, row))
    }

    fn update(&self, uow: &mut UnitOfWork, table: &str, data: &Row, filter: &Row) -> Result<u64> {
        let define = self.support().table(table)?;
        self.update_where(uow, table, data, &filter_conditions(define.name(), filter))
    }

    /// Sharding values are looked up in the filter first, then in the data.
    fn update_where(
        &self,
        uow: &mut UnitOfWork,
        table: &str,
        data: &Row,
        conditions: &[Condition],
    ) -> Result<u64> {
        let define = self.support().table(table)?;
        let mut bag = ValueBag::from_conditions(conditions);
        bag.absorb_row(data);
        let route = self.support().route(&define, &bag)?;
        dispatch(self, uow, "update", define.name(), |client| {
            client.update(&route, &define, data, conditions)
        })
    }

    fn delete(&self, uow: &mut UnitOfWork, table: &str, filter: &Row) -> Result<u64> {
        let define = self.support().table(table)?;
        self.delete_where(uow, table, &filter_conditions(define.name(), filter))
    }

    fn delete_where(&self, uow: &mut UnitOfWork, table: &str, conditions: &[Condition]) -> Result<u64> {
        let define = self.support().table(table)?;
        let route = self
            .support()
            .route(&define, &ValueBag::from_conditions(conditions))?;
        dispatch(self, uow, "delete", define.name(), |client| {
            client.delete(&route, &define, conditions)
        })
    }

    /// Lock the records matching `filter` until the enclosing transaction ends.
    fn lock_record(&self, uow: &mut UnitOfWork, table: &str, filter: &Row) -> Result<bool> {
        let define = self.support().table(table)?;
        let conditions = filter_conditions(define.name(), filter);
        let route = self
            .support()
            .route(&define, &ValueBag::from_conditions(&conditions))?;
        dispatch(self, uow, "lock_record", define.name(), |client| {
            client.lock_record(&route, &define, &conditions)
        })
    }

    fn query(&self, uow: &mut UnitOfWork, info: &QueryInfo) -> Result<Vec<Row>> {
        let define = self.support().table(&info.table)?;
        let route = self
            .support()
            .route(&define, &ValueBag::from_conditions(&info.conditions))?;
        let rows = dispatch(self, uow, "query", define.name(), |client| {
            client.query(&route, &define, info)
        })?;
        Ok(rows
            .into_iter()
            .map(|row| self.support().normalize(&define, row))
            .collect())
    }

    fn query_for_update(
        &self,
        uow: &mut UnitOfWork,
        table: &str,
        filter: &Row,
        columns: &str,
    ) -> Result<Vec<Row>> {
        let define = self.support().table(table)?;
        let projection = self.support().projection(&define, columns)?;
        let conditions = filter_conditions(define.name(), filter);
        let route = self
            .support()
            .route(&define, &ValueBag::from_conditions(&conditions))?;
        let rows = dispatch(self, uow, "query_for_update", define.name(), |client| {
            client.query_for_update(&route, &define, &conditions, &projection)
        })?;
        Ok(rows
            .into_iter()
            .map(|row| self.support().normalize(&define, row))
            .collect())
    }

    fn query_total(&self, uow: &mut UnitOfWork, info: &QueryInfo) -> Result<u64> {
        let define = self.support().table(&info.table)?;
        let route = self
            .support()
            .route(&define, &ValueBag::from_conditions(&info.conditions))?;
        dispatch(self, uow, "query_total", define.name(), |client| {
            client.query_total(&route, &define, info)
        })
    }

    /// `sharding` supplies the values a sharded table's template needs; pass an empty map for
    /// unsharded tables.
    fn truncate_table(&self, uow: &mut UnitOfWork, table: &str, sharding: &Row) -> Result<()> {
        let define = self.support().table(table)?;
        let route = self.support().route(&define, &ValueBag::from_row(sharding))?;
        dispatch(self, uow, "truncate_table", define.name(), |client| {
            client.truncate_table(&route, &define)
        })
    }

    /// Truncate every unsharded table of the schema.
    fn truncate_tables(&self, uow: &mut UnitOfWork) -> Result<()> {
        let targets = self.support().unsharded_targets();
        dispatch(self, uow, "truncate_tables", "*", |client| {
            client.truncate_tables(&targets)
        })
    }

    fn drop_table(&self, uow: &mut UnitOfWork, table: &str, sharding: &Row) -> Result<()> {
        let define = self.support().table(table)?;
        let route = self.support().route(&define, &ValueBag::from_row(sharding))?;
        dispatch(self, uow, "drop_table", define.name(), |client| {
            client.drop_table(&route, &define)
        })
    }

    /// Drop every unsharded table of the schema.
    fn drop_tables(&self, uow: &mut UnitOfWork) -> Result<()> {
        let targets = self.support().unsharded_targets();
        dispatch(self, uow, "drop_tables", "*", |client| client.drop_tables(&targets))
    }
}

/// Run `f` on the unit of work's bound client, or on a client opened for this call only.
pub(crate) fn dispatch<S, R, F>(
    schema: &S,
    uow: &mut UnitOfWork,
    operation: &'static str,
    table: &str,
    f: F,
) -> Result<R>
where
    S: Schema + ?Sized,
    F: FnOnce(&mut dyn DialectClient) -> Result<R>,
{
    #[cfg(feature = "tracing")]
    let family = schema.family().to_string();
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::operation_span(&family, operation, table).entered();

    let start = Instant::now();
    let result = if let Some(client) = uow.client_mut() {
        f(client)
    } else {
        log::debug!("No client bound for {} on {}, opening one", operation, table);
        let mut client = schema.open_client(uow)?;
        let result = f(client.as_mut());
        if let Err(err) = client.close() {
            log::warn!("Failed to close client after {}: {}", operation, err);
        }
        result
    };

    #[cfg(feature = "metrics")]
    crate::metrics::METRICS.record_operation(operation, start.elapsed(), result.is_err());
    #[cfg(not(feature = "metrics"))]
    let _ = start;

    result
}

/// Drive `initialize` against one client: sharding registration once, then the DDL mode.
pub(crate) fn prepare_store(support: &SchemaSupport, client: &mut dyn DialectClient) -> Result<()> {
    if support.claim_sharding_init() {
        let sharded = support.sharded_tables();
        if !sharded.is_empty() {
            log::debug!("Registering {} sharded tables", sharded.len());
        }
        client.init_sharding(&sharded)?;
    }

    match support.mode() {
        DdlMode::None => {}
        DdlMode::Validate => {
            for (route, define) in support.unsharded_targets() {
                let live = client.table_columns(&route, &define)?;
                define.validate(&live)?;
            }
        }
        DdlMode::Create | DdlMode::CreateDrop => {
            for (route, define) in support.unsharded_targets() {
                client.init_table(&route, &define)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn commit_bound(uow: &mut UnitOfWork) -> Result<()> {
    if uow.state() != TransactionState::Active {
        log::debug!("Unit of work {} has no active transaction to commit", uow.id());
        return Ok(());
    }
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::commit_transaction_span(&uow.id().to_string()).entered();

    let result = match uow.client_mut() {
        Some(client) => client.commit(),
        None => Ok(()),
    };
    if result.is_ok() {
        uow.set_state(TransactionState::Committed);
    }
    result
}

pub(crate) fn rollback_bound(uow: &mut UnitOfWork, cause: &BridgeError) -> Result<()> {
    let Some(config) = uow.transaction() else {
        log::debug!("Unit of work {} has no transaction bound, nothing to roll back", uow.id());
        return Ok(());
    };
    if !config.isolation.is_transactional() {
        return Ok(());
    }
    if !config.rollback.accepts(cause) {
        log::info!(
            "Not rolling back unit of work {} for {} error: {}",
            uow.id(),
            cause.kind(),
            cause
        );
        return Ok(());
    }
    if uow.state() != TransactionState::Active {
        return Ok(());
    }

    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::rollback_transaction_span(&uow.id().to_string()).entered();
    log::info!("Rolling back unit of work {}: {}", uow.id(), cause);

    let result = match uow.client_mut() {
        Some(client) => client.rollback(),
        None => Ok(()),
    };
    uow.set_state(TransactionState::RolledBack);
    result
}

/// Take the bound client and close it, logging (not returning) a close failure.
pub(crate) fn release_bound(uow: &mut UnitOfWork) {
    if let Some(mut client) = uow.take_client() {
        if let Err(err) = client.close() {
            log::warn!("Failed to close client of unit of work {}: {}", uow.id(), err);
        }
    }
    if uow.state() != TransactionState::Idle {
        uow.set_state(TransactionState::Idle);
    }
}

/// Begin, run `f`, commit on success, roll back on failure, and always clear.
///
/// # Errors
///
/// The first failure of begin, `f` or commit. A rollback failure is logged and the original
/// error returned.
pub fn execute_in<S, R, F>(schema: &S, uow: &mut UnitOfWork, f: F) -> Result<R>
where
    S: Schema + ?Sized,
    F: FnOnce(&S, &mut UnitOfWork) -> Result<R>,
{
    let outcome = match schema.begin_transaction(uow) {
        Ok(()) => match f(schema, uow) {
            Ok(value) => schema.commit(uow).map(|()| value),
            Err(err) => Err(err),
        },
        Err(err) => Err(err),
    };

    if let Err(err) = &outcome {
        if let Err(rollback_err) = schema.rollback(uow, err) {
            log::warn!(
                "Rollback of unit of work {} failed: {}",
                uow.id(),
                rollback_err
            );
        }
    }
    schema.clear_transactional(uow);
    outcome
}
