//! Remote unit-of-work lifecycle through the public API.
//!
//! The remote dialect here is a local double: it builds clients that log every call into a
//! shared journal, so the tests can check how many clients a unit of work allocated and which
//! transaction calls reached them.

use bridgehead::config::RemoteConfig;
use bridgehead::define::{ColumnDefine, DataType, ShardingRule, TableDefine};
use bridgehead::dialect::remote::{RemoteDialect, RemoteSettings, RemoteType};
use bridgehead::dialect::{DialectClient, DialectType, RoutingKey};
use bridgehead::error::{BridgeError, ErrorCode, ErrorKind, Result};
use bridgehead::query::{Condition, QueryInfo};
use bridgehead::schema::{
    execute_in, RemoteSchema, RollbackPolicy, Schema, SchemaSupport, TransactionConfig,
    TransactionState, UnitOfWork,
};
use bridgehead::Row;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Journal = Arc<Mutex<Vec<String>>>;

struct JournalDialect {
    journal: Journal,
}

impl JournalDialect {
    fn new() -> (Arc<Self>, Journal) {
        let journal: Journal = Arc::default();
        (
            Arc::new(Self {
                journal: Arc::clone(&journal),
            }),
            journal,
        )
    }
}

impl RemoteDialect for JournalDialect {
    fn build_soap(&self, _settings: &RemoteSettings) -> Result<Box<dyn DialectClient>> {
        self.journal.lock().unwrap().push("build soap".to_string());
        Ok(Box::new(JournalClient {
            journal: Arc::clone(&self.journal),
        }))
    }

    fn build_rest(&self, _settings: &RemoteSettings) -> Result<Box<dyn DialectClient>> {
        self.journal.lock().unwrap().push("build rest".to_string());
        Ok(Box::new(JournalClient {
            journal: Arc::clone(&self.journal),
        }))
    }

    fn config_retry(&self, _count: u32, _period: Duration) {}

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct JournalClient {
    journal: Journal,
}

impl JournalClient {
    fn log(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

impl DialectClient for JournalClient {
    fn begin_transaction(&mut self, _config: &TransactionConfig) -> Result<()> {
        self.log("begin".to_string());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.log("commit".to_string());
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.log("rollback".to_string());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.log("close".to_string());
        Ok(())
    }

    fn init_sharding(&mut self, _tables: &[Arc<TableDefine>]) -> Result<()> {
        Ok(())
    }

    fn init_table(&mut self, _route: &RoutingKey, _define: &TableDefine) -> Result<()> {
        Ok(())
    }

    fn table_columns(
        &mut self,
        _route: &RoutingKey,
        define: &TableDefine,
    ) -> Result<Vec<ColumnDefine>> {
        Ok(define.columns().to_vec())
    }

    fn insert(&mut self, route: &RoutingKey, _define: &TableDefine, data: &Row) -> Result<Row> {
        self.log(format!("insert {route}"));
        Ok(data.clone())
    }

    fn retrieve(
        &mut self,
        _route: &RoutingKey,
        _define: &TableDefine,
        _filter: &[Condition],
        _columns: &[String],
    ) -> Result<Row> {
        Ok(Row::new())
    }

    fn update(
        &mut self,
        _route: &RoutingKey,
        _define: &TableDefine,
        _data: &Row,
        _filter: &[Condition],
    ) -> Result<u64> {
        Err(BridgeError::transport(
            ErrorCode::RemoteFault,
            &[&"https://svc.example.com/api/update", &"record is locked"],
        ))
    }

    fn delete(
        &mut self,
        _route: &RoutingKey,
        _define: &TableDefine,
        _filter: &[Condition],
    ) -> Result<u64> {
        Ok(0)
    }

    fn lock_record(
        &mut self,
        _route: &RoutingKey,
        _define: &TableDefine,
        _filter: &[Condition],
    ) -> Result<bool> {
        Ok(true)
    }

    fn query(
        &mut self,
        _route: &RoutingKey,
        _define: &TableDefine,
        _info: &QueryInfo,
    ) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    fn query_for_update(
        &mut self,
        _route: &RoutingKey,
        _define: &TableDefine,
        _filter: &[Condition],
        _columns: &[String],
    ) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    fn query_total(
        &mut self,
        _route: &RoutingKey,
        _define: &TableDefine,
        _info: &QueryInfo,
    ) -> Result<u64> {
        Ok(0)
    }

    fn truncate_table(&mut self, _route: &RoutingKey, _define: &TableDefine) -> Result<()> {
        Ok(())
    }

    fn drop_table(&mut self, _route: &RoutingKey, _define: &TableDefine) -> Result<()> {
        Ok(())
    }
}

fn remote_schema(dialect: Arc<JournalDialect>) -> RemoteSchema {
    let tickets = TableDefine::new(
        "tickets",
        Some(ShardingRule::table("tickets_{queue}")),
        vec![
            ColumnDefine::new("id", DataType::BigInt).primary_key(),
            ColumnDefine::new("queue", DataType::Varchar),
        ],
        vec![],
    );
    RemoteSchema::new(
        SchemaSupport::new(DialectType::Remote, vec![tickets], "main"),
        dialect,
        RemoteConfig::new(RemoteType::Restful, "https://svc.example.com/api"),
    )
    .unwrap()
}

fn entries(journal: &Journal, entry: &str) -> usize {
    journal.lock().unwrap().iter().filter(|e| *e == entry).count()
}

fn ticket(queue: &str) -> Row {
    Row::from([
        ("id".to_string(), json!(rand::random::<u32>())),
        ("queue".to_string(), json!(queue)),
    ])
}

#[test]
fn test_repeated_begin_shares_one_client() {
    let (dialect, journal) = JournalDialect::new();
    let schema = remote_schema(dialect);
    let mut uow = UnitOfWork::with_transaction(TransactionConfig::default());

    schema.begin_transaction(&mut uow).unwrap();
    schema.begin_transaction(&mut uow).unwrap();
    assert_eq!(schema.active_connections(), 2);
    assert_eq!(entries(&journal, "build rest"), 1);
    assert_eq!(entries(&journal, "begin"), 1);

    schema.clear_transactional(&mut uow);
    assert_eq!(schema.active_connections(), 0);
    assert_eq!(uow.state(), TransactionState::Idle);
    assert!(!uow.has_client());
    assert_eq!(entries(&journal, "close"), 1);
}

#[test]
fn test_execute_in_commits_on_the_bound_client() {
    let (dialect, journal) = JournalDialect::new();
    let schema = remote_schema(dialect);
    let mut uow = UnitOfWork::with_transaction(TransactionConfig::default());

    let stored = execute_in(&schema, &mut uow, |schema, uow| {
        schema.insert(uow, "tickets", &ticket("billing"))
    })
    .unwrap();

    assert_eq!(stored["queue"], "billing");
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["build rest", "begin", "insert table tickets_billing", "commit", "close"]
    );
    assert_eq!(schema.active_connections(), 0);
}

#[test]
fn test_transport_failure_rolls_back_and_clears() {
    let (dialect, journal) = JournalDialect::new();
    let schema = remote_schema(dialect);
    let mut uow = UnitOfWork::with_transaction(TransactionConfig::default());

    let err = execute_in(&schema, &mut uow, |schema, uow| {
        let filter = Row::from([("queue".to_string(), json!("ops"))]);
        schema.update(uow, "tickets", &ticket("ops"), &filter)
    })
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(err.code(), ErrorCode::RemoteFault);
    assert_eq!(entries(&journal, "rollback"), 1);
    assert_eq!(entries(&journal, "commit"), 0);
    assert_eq!(schema.active_connections(), 0);
    assert!(!uow.has_client());
}

#[test]
fn test_policy_can_decline_rollback() {
    let (dialect, journal) = JournalDialect::new();
    let schema = remote_schema(dialect);
    let config = TransactionConfig::default().rollback(RollbackPolicy::only(&[ErrorKind::Usage]));
    let mut uow = UnitOfWork::with_transaction(config);

    let result = execute_in(&schema, &mut uow, |schema, uow| {
        let filter = Row::from([("queue".to_string(), json!("ops"))]);
        schema.update(uow, "tickets", &ticket("ops"), &filter)
    });

    assert!(result.is_err());
    assert_eq!(entries(&journal, "rollback"), 0);
    assert_eq!(entries(&journal, "close"), 1);
    assert_eq!(schema.active_connections(), 0);
}

#[test]
fn test_missing_sharding_value_is_usage_error_and_still_clears() {
    let (dialect, journal) = JournalDialect::new();
    let schema = remote_schema(dialect);
    let mut uow = UnitOfWork::with_transaction(TransactionConfig::default());

    let err = execute_in(&schema, &mut uow, |schema, uow| {
        schema.insert(uow, "tickets", &Row::from([("id".to_string(), json!(1))]))
    })
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(err.code(), ErrorCode::ShardingValueMissing);
    assert_eq!(entries(&journal, "rollback"), 1);
    assert_eq!(schema.active_connections(), 0);
}

#[test]
fn test_units_of_work_on_many_threads_balance_the_counter() {
    let (dialect, journal) = JournalDialect::new();
    let schema = remote_schema(dialect);

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let mut uow = UnitOfWork::with_transaction(TransactionConfig::default());
                let begins = 1 + rand::random::<usize>() % 4;
                for _ in 0..begins {
                    schema.begin_transaction(&mut uow).unwrap();
                }
                assert!(schema.active_connections() >= begins);
                schema.clear_transactional(&mut uow);
            });
        }
    });

    assert_eq!(schema.active_connections(), 0);
    assert_eq!(entries(&journal, "build rest"), 8);
    assert_eq!(entries(&journal, "close"), 8);
}
