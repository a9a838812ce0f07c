//! Per-unit-of-work PostgreSQL client.
//!
//! Connections are leased lazily, one per physical database the unit of work touches, and
//! held until `close`. While a transaction is bound every lease opens it on acquisition, and
//! `commit`/`rollback` apply to all of them.

use super::compiler;
use super::row::{decode_count, decode_row, decode_rows};
use super::{ConnectionPool, Shared};
use crate::define::{ColumnDefine, DataType, GeneratorDefine, TableDefine};
use crate::dialect::{DialectClient, RoutingKey};
use crate::error::{BridgeError, ErrorCode, Result};
use crate::query::value_conversion::with_converted_params;
use crate::query::{Condition, GeneratedCommand, QueryInfo};
use crate::row::Row;
use crate::schema::transaction::TransactionConfig;
use may_postgres::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

const LIVE_COLUMNS_SQL: &str = "SELECT c.column_name::text AS column_name, \
     c.data_type::text AS data_type, \
     c.is_nullable::text AS is_nullable, \
     c.column_default::text AS column_default, \
     c.is_identity::text AS is_identity, \
     c.character_maximum_length::int4 AS max_length, \
     EXISTS (SELECT 1 FROM information_schema.table_constraints tc \
       JOIN information_schema.key_column_usage k \
         ON k.constraint_name = tc.constraint_name \
        AND k.table_schema = tc.table_schema \
        AND k.table_name = tc.table_name \
      WHERE tc.constraint_type = 'PRIMARY KEY' \
        AND tc.table_schema = c.table_schema \
        AND tc.table_name = c.table_name \
        AND k.column_name = c.column_name) AS is_primary \
     FROM information_schema.columns c \
     WHERE c.table_schema = current_schema() AND c.table_name::text = $1 \
     ORDER BY c.ordinal_position";

struct Lease {
    pool: Arc<ConnectionPool>,
    client: Client,
}

pub struct PostgresClient {
    shared: Arc<Shared>,
    leases: HashMap<String, Lease>,
    transaction: Option<TransactionConfig>,
}

fn open_transaction(client: &Client, config: &TransactionConfig) -> Result<()> {
    let mut begin = String::from("BEGIN");
    if let Some(isolation) = config.isolation.to_sql() {
        begin.push_str(" ISOLATION LEVEL ");
        begin.push_str(isolation);
    }
    if config.read_only {
        begin.push_str(" READ ONLY");
    }
    client.execute(begin.as_str(), &[])?;
    if let Some(timeout) = config.timeout_duration() {
        let statement = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());
        client.execute(statement.as_str(), &[])?;
    }
    Ok(())
}

fn database_of(route: &RoutingKey) -> Option<&str> {
    route.database()
}

impl PostgresClient {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            leases: HashMap::new(),
            transaction: None,
        }
    }

    fn connection(&mut self, database: Option<&str>) -> Result<&Client> {
        let key = database.unwrap_or_default().to_string();
        if !self.leases.contains_key(&key) {
            let pool = self.shared.pool(database);
            let policy = self.shared.retry.policy();
            let client = policy.acquire(pool.database(), || pool.acquire())?;
            if let Some(config) = self.transaction.as_ref() {
                open_transaction(&client, config)?;
            }
            self.leases.insert(key.clone(), Lease { pool, client });
        }
        self.leases
            .get(&key)
            .map(|lease| &lease.client)
            .ok_or_else(|| {
                BridgeError::transport(ErrorCode::Backend, &[&"postgres", &"connection lease lost"])
            })
    }

    fn fetch(
        &mut self,
        database: Option<&str>,
        command: &GeneratedCommand,
    ) -> Result<Vec<may_postgres::Row>> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_command_span(&command.command).entered();
        log::debug!("Executing query: {}", command.command);

        let client = self.connection(database)?;
        with_converted_params(&command.parameters, |params| {
            Ok(client.query(command.command.as_str(), params)?)
        })
    }

    fn execute(&mut self, database: Option<&str>, command: &GeneratedCommand) -> Result<u64> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_command_span(&command.command).entered();
        log::debug!("Executing statement: {}", command.command);

        let client = self.connection(database)?;
        with_converted_params(&command.parameters, |params| {
            Ok(client.execute(command.command.as_str(), params)?)
        })
    }

    /// Create a sharded physical table the first time it is written to.
    fn provision(&mut self, route: &RoutingKey, define: &TableDefine) -> Result<()> {
        if !self.shared.auto_create() || !self.shared.is_sharded(define.name()) {
            return Ok(());
        }
        let physical = route.physical_table(define).to_string();
        if self.shared.mark_provisioned(database_of(route), &physical) {
            log::info!("Provisioning {} for sharded table {}", route, define.name());
            if let Err(err) = self.create(route, define) {
                self.shared.forget_provisioned(database_of(route), &physical);
                return Err(err);
            }
        }
        Ok(())
    }

    fn create(&mut self, route: &RoutingKey, define: &TableDefine) -> Result<()> {
        let commands = compiler::compile_create_table(define, route.physical_table(define))?;
        for command in &commands {
            self.execute(database_of(route), command)?;
        }
        Ok(())
    }

    fn finish_transaction(&mut self, statement: &str) -> Result<()> {
        if self.transaction.take().is_none() {
            return Ok(());
        }
        let mut first_error = None;
        for (database, lease) in &self.leases {
            if let Err(err) = lease.client.execute(statement, &[]) {
                log::warn!("{} failed on database {:?}: {}", statement, database, err);
                if first_error.is_none() {
                    first_error = Some(BridgeError::from(err));
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Map one `information_schema.columns` row to a column descriptor.
fn live_column(table: &str, row: &Row) -> Option<ColumnDefine> {
    let text = |key: &str| row.get(key).and_then(Value::as_str).map(str::to_string);
    let name = text("column_name")?;
    let mut column = ColumnDefine::new(
        name.clone(),
        DataType::parse(&text("data_type").unwrap_or_default()),
    );
    column.nullable = text("is_nullable").is_some_and(|v| v.eq_ignore_ascii_case("YES"));
    column.primary_key = row
        .get("is_primary")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    column.length = row
        .get("max_length")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok());

    let default = text("column_default");
    if text("is_identity").is_some_and(|v| v.eq_ignore_ascii_case("YES")) {
        column.generator = Some(GeneratorDefine::identity());
    } else if let Some(sequence) = default.as_deref().and_then(sequence_name) {
        // serial columns own a sequence named after the column
        let owned = format!("{}_{}_seq", table, name);
        column.generator = Some(if sequence.eq_ignore_ascii_case(&owned) {
            GeneratorDefine::identity()
        } else {
            GeneratorDefine::sequence(sequence)
        });
    } else {
        column.default_value = default;
    }
    Some(column)
}

/// `nextval('seq'::regclass)` -> `seq`
fn sequence_name(default: &str) -> Option<String> {
    let rest = default.trim().strip_prefix("nextval('")?;
    let end = rest.find('\'')?;
    let name = &rest[..end];
    let unqualified = name.rsplit('.').next().unwrap_or(name);
    Some(unqualified.trim_matches('"').to_string())
}

impl DialectClient for PostgresClient {
    fn begin_transaction(&mut self, config: &TransactionConfig) -> Result<()> {
        if self.transaction.is_some() {
            return Err(BridgeError::usage(
                ErrorCode::InvalidValue,
                &[&"transaction", &"a transaction is already open on this client"],
            ));
        }
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span("postgres").entered();

        for lease in self.leases.values() {
            open_transaction(&lease.client, config)?;
        }
        self.transaction = Some(config.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.finish_transaction("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.finish_transaction("ROLLBACK")
    }

    fn close(&mut self) -> Result<()> {
        let result = if self.transaction.is_some() {
            self.rollback()
        } else {
            Ok(())
        };
        for (_, lease) in self.leases.drain() {
            if result.is_ok() {
                lease.pool.release(lease.client);
            }
        }
        result
    }

    fn init_sharding(&mut self, tables: &[Arc<TableDefine>]) -> Result<()> {
        for define in tables.iter().filter(|t| t.is_sharded()) {
            self.shared.register_sharded(define.name());
        }
        Ok(())
    }

    fn init_table(&mut self, route: &RoutingKey, define: &TableDefine) -> Result<()> {
        self.create(route, define)?;
        self.shared
            .mark_provisioned(database_of(route), route.physical_table(define));
        Ok(())
    }

    fn table_columns(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
    ) -> Result<Vec<ColumnDefine>> {
        let physical = route.physical_table(define).to_string();
        let command = GeneratedCommand::new(
            LIVE_COLUMNS_SQL,
            vec![sea_query::Value::String(Some(physical.clone()))],
        );
        let rows = decode_rows(&self.fetch(database_of(route), &command)?)?;
        Ok(rows
            .iter()
            .filter_map(|row| live_column(&physical, row))
            .collect())
    }

    fn insert(&mut self, route: &RoutingKey, define: &TableDefine, data: &Row) -> Result<Row> {
        self.provision(route, define)?;
        let command = compiler::compile_insert(define, route.physical_table(define), data)?;
        let rows = self.fetch(database_of(route), &command)?;
        match rows.first() {
            Some(row) => decode_row(row),
            None => Ok(data.clone()),
        }
    }

    fn retrieve(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        filter: &[Condition],
        columns: &[String],
    ) -> Result<Row> {
        let command = compiler::compile_retrieve(
            define,
            route.physical_table(define),
            filter,
            columns,
            true,
            false,
        )?;
        let rows = self.fetch(database_of(route), &command)?;
        match rows.first() {
            Some(row) => decode_row(row),
            None => Ok(Row::new()),
        }
    }

    fn update(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        data: &Row,
        filter: &[Condition],
    ) -> Result<u64> {
        let command =
            compiler::compile_update(define, route.physical_table(define), data, filter)?;
        self.execute(database_of(route), &command)
    }

    fn delete(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        filter: &[Condition],
    ) -> Result<u64> {
        let command = compiler::compile_delete(define, route.physical_table(define), filter)?;
        self.execute(database_of(route), &command)
    }

    fn lock_record(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        filter: &[Condition],
    ) -> Result<bool> {
        let keys: Vec<String> = define.primary_keys().map(|c| c.name.clone()).collect();
        let command = compiler::compile_retrieve(
            define,
            route.physical_table(define),
            filter,
            &keys,
            false,
            true,
        )?;
        Ok(!self.fetch(database_of(route), &command)?.is_empty())
    }

    fn query(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        info: &QueryInfo,
    ) -> Result<Vec<Row>> {
        let start = Instant::now();
        let command = compiler::compile_select(define, route.physical_table(define), info)?;
        let rows = decode_rows(&self.fetch(database_of(route), &command)?)?;
        log::debug!(
            "Query on {} returned {} rows in {:?}",
            define.name(),
            rows.len(),
            start.elapsed()
        );
        Ok(rows)
    }

    fn query_for_update(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        filter: &[Condition],
        columns: &[String],
    ) -> Result<Vec<Row>> {
        let command = compiler::compile_retrieve(
            define,
            route.physical_table(define),
            filter,
            columns,
            false,
            true,
        )?;
        decode_rows(&self.fetch(database_of(route), &command)?)
    }

    fn query_total(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        info: &QueryInfo,
    ) -> Result<u64> {
        let command = compiler::compile_count(define, route.physical_table(define), info)?;
        decode_count(&self.fetch(database_of(route), &command)?)
    }

    fn truncate_table(&mut self, route: &RoutingKey, define: &TableDefine) -> Result<()> {
        let command = compiler::compile_truncate(route.physical_table(define));
        self.execute(database_of(route), &command)?;
        Ok(())
    }

    fn drop_table(&mut self, route: &RoutingKey, define: &TableDefine) -> Result<()> {
        let physical = route.physical_table(define).to_string();
        self.execute(database_of(route), &compiler::compile_drop(&physical))?;
        self.shared.forget_provisioned(database_of(route), &physical);
        Ok(())
    }
}

impl Drop for PostgresClient {
    fn drop(&mut self) {
        if !self.leases.is_empty() {
            if let Err(err) = self.close() {
                log::warn!("Closing PostgreSQL client on drop failed: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define::GenerationType;
    use serde_json::json;

    fn live(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_sequence_name() {
        assert_eq!(
            sequence_name("nextval('orders_id_seq'::regclass)").as_deref(),
            Some("orders_id_seq")
        );
        assert_eq!(
            sequence_name("nextval('public.order_numbers'::regclass)").as_deref(),
            Some("order_numbers")
        );
        assert_eq!(sequence_name("now()"), None);
    }

    #[test]
    fn test_live_column_serial_is_identity() {
        let row = live(&[
            ("column_name", json!("id")),
            ("data_type", json!("bigint")),
            ("is_nullable", json!("NO")),
            ("column_default", json!("nextval('orders_id_seq'::regclass)")),
            ("is_identity", json!("NO")),
            ("is_primary", json!(true)),
        ]);
        let column = live_column("orders", &row).unwrap();
        assert_eq!(column.data_type, DataType::BigInt);
        assert!(column.primary_key);
        assert!(!column.nullable);
        assert_eq!(
            column.generator.unwrap().generation_type,
            GenerationType::Identity
        );
    }

    #[test]
    fn test_live_column_named_sequence() {
        let row = live(&[
            ("column_name", json!("number")),
            ("data_type", json!("integer")),
            ("is_nullable", json!("YES")),
            ("column_default", json!("nextval('order_numbers'::regclass)")),
            ("is_identity", json!("NO")),
            ("is_primary", json!(false)),
        ]);
        let column = live_column("orders", &row).unwrap();
        let generator = column.generator.unwrap();
        assert_eq!(generator.generation_type, GenerationType::Sequence);
        assert_eq!(generator.generator, "order_numbers");
    }

    #[test]
    fn test_live_column_plain_default() {
        let row = live(&[
            ("column_name", json!("status")),
            ("data_type", json!("character varying")),
            ("is_nullable", json!("YES")),
            ("column_default", json!("'open'::character varying")),
            ("is_identity", json!("NO")),
            ("max_length", json!(32)),
        ]);
        let column = live_column("orders", &row).unwrap();
        assert_eq!(column.data_type, DataType::Varchar);
        assert_eq!(column.length, Some(32));
        assert!(column.generator.is_none());
        assert!(column.default_value.is_some());
    }

    #[test]
    fn test_live_column_requires_name() {
        assert!(live_column("orders", &Row::new()).is_none());
    }
}
