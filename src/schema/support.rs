//! State and helpers shared by every schema family.

use super::DdlMode;
use crate::define::{sharding_database, sharding_table, GenerationType, TableDefine, ValueBag};
use crate::dialect::{DialectType, RoutingKey};
use crate::error::{BridgeError, ErrorCode, Result};
use crate::row::{get_ignore_case, Row};
use crate::task::TaskQueue;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Name of the built-in custom generator that fills a v4 UUID.
pub const UUID_GENERATOR: &str = "uuid";

pub struct SchemaSupport {
    family: DialectType,
    tables: Vec<Arc<TableDefine>>,
    by_name: HashMap<String, usize>,
    default_database: String,
    ddl_mode: DdlMode,
    task_queue: Option<(Arc<dyn TaskQueue>, PathBuf)>,
    sharding_ready: AtomicBool,
}

impl SchemaSupport {
    /// Later definitions with the same (case-insensitive) name replace earlier ones.
    pub fn new(family: DialectType, tables: Vec<TableDefine>, default_database: &str) -> Self {
        let mut support = Self {
            family,
            tables: Vec::with_capacity(tables.len()),
            by_name: HashMap::new(),
            default_database: default_database.trim().to_string(),
            ddl_mode: DdlMode::default(),
            task_queue: None,
            sharding_ready: AtomicBool::new(false),
        };
        for define in tables {
            let key = define.name().to_lowercase();
            match support.by_name.get(&key) {
                Some(&index) => support.tables[index] = Arc::new(define),
                None => {
                    support.by_name.insert(key, support.tables.len());
                    support.tables.push(Arc::new(define));
                }
            }
        }
        support
    }

    pub fn ddl_mode(mut self, mode: DdlMode) -> Self {
        self.ddl_mode = mode;
        self
    }

    pub fn task_queue(mut self, queue: Arc<dyn TaskQueue>, base_path: impl Into<PathBuf>) -> Self {
        self.task_queue = Some((queue, base_path.into()));
        self
    }

    pub fn family(&self) -> DialectType {
        self.family
    }

    pub fn mode(&self) -> DdlMode {
        self.ddl_mode
    }

    pub fn default_database(&self) -> &str {
        &self.default_database
    }

    pub fn tables(&self) -> &[Arc<TableDefine>] {
        &self.tables
    }

    /// # Errors
    ///
    /// `TableNotDefined` (usage) when no definition carries that name.
    pub fn table(&self, name: &str) -> Result<Arc<TableDefine>> {
        self.by_name
            .get(&name.trim().to_lowercase())
            .map(|&index| Arc::clone(&self.tables[index]))
            .ok_or_else(|| BridgeError::usage(ErrorCode::TableNotDefined, &[&name]))
    }

    /// Resolve where an operation on `define` lands. The distribute family shards databases,
    /// every other family shards tables.
    pub fn route(&self, define: &TableDefine, bag: &ValueBag) -> Result<RoutingKey> {
        match self.family {
            DialectType::Distribute => Ok(RoutingKey::Database(sharding_database(
                define,
                bag,
                &self.default_database,
            )?)),
            _ => Ok(RoutingKey::Table(sharding_table(define, bag)?)),
        }
    }

    /// Routes of every table that needs no sharding value. Sharded tables are skipped.
    pub fn unsharded_targets(&self) -> Vec<(RoutingKey, Arc<TableDefine>)> {
        let empty = ValueBag::new();
        self.tables
            .iter()
            .filter(|define| !define.is_sharded())
            .filter_map(|define| {
                self.route(define, &empty)
                    .ok()
                    .map(|route| (route, Arc::clone(define)))
            })
            .collect()
    }

    pub fn sharded_tables(&self) -> Vec<Arc<TableDefine>> {
        self.tables
            .iter()
            .filter(|define| define.is_sharded())
            .cloned()
            .collect()
    }

    /// Parse a comma-joined projection. Blank means every declared column.
    ///
    /// # Errors
    ///
    /// `NoColumnsToProject` (usage) when the result would be empty.
    pub fn projection(&self, define: &TableDefine, columns: &str) -> Result<Vec<String>> {
        let requested: Vec<String> = columns
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| {
                define
                    .column(name)
                    .map(|column| column.name.clone())
                    .unwrap_or_else(|| name.to_string())
            })
            .collect();
        let projection = if requested.is_empty() {
            define.projection()
        } else {
            requested
        };
        if projection.is_empty() {
            return Err(BridgeError::usage(
                ErrorCode::NoColumnsToProject,
                &[&define.name()],
            ));
        }
        Ok(projection)
    }

    /// Fill application-side generated columns the caller left out.
    pub fn prepare_insert(&self, define: &TableDefine, data: &Row) -> Row {
        let mut prepared = data.clone();
        for column in define.columns() {
            let Some(generator) = &column.generator else {
                continue;
            };
            if generator.generation_type != GenerationType::Custom
                || !generator.generator.eq_ignore_ascii_case(UUID_GENERATOR)
            {
                continue;
            }
            let missing = get_ignore_case(data, &column.name).map_or(true, Value::is_null);
            if missing {
                prepared.insert(
                    column.name.clone(),
                    Value::String(Uuid::new_v4().to_string()),
                );
            }
        }
        prepared
    }

    /// Rename reply keys to their declared spelling. Undeclared keys (aliases, aggregates) stay.
    pub fn normalize(&self, define: &TableDefine, row: Row) -> Row {
        row.into_iter()
            .map(|(name, value)| match define.column(&name) {
                Some(column) => (column.name.clone(), value),
                None => (name, value),
            })
            .collect()
    }

    /// `true` the first time it is called.
    pub(crate) fn claim_sharding_init(&self) -> bool {
        !self.sharding_ready.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn start_tasks(&self) -> Result<()> {
        if let Some((queue, base_path)) = &self.task_queue {
            log::info!("Initialising task queue at {}", base_path.display());
            queue.initialize(base_path)?;
        }
        Ok(())
    }

    pub(crate) fn stop_tasks(&self) -> Result<()> {
        match &self.task_queue {
            Some((queue, _)) => queue.destroy(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define::{ColumnDefine, DataType, GeneratorDefine, ShardingRule};
    use crate::error::ErrorKind;
    use serde_json::json;

    fn orders(rule: Option<ShardingRule>) -> TableDefine {
        TableDefine::new(
            "Orders",
            rule,
            vec![
                ColumnDefine::new("id", DataType::Varchar)
                    .primary_key()
                    .generator(GeneratorDefine::custom("uuid")),
                ColumnDefine::new("Region", DataType::Varchar),
                ColumnDefine::new("total", DataType::Decimal),
            ],
            vec![],
        )
    }

    #[test]
    fn test_table_lookup_is_case_insensitive() {
        let support = SchemaSupport::new(DialectType::Relational, vec![orders(None)], "main");
        assert_eq!(support.table("ORDERS").unwrap().name(), "Orders");
        let err = support.table("missing").unwrap_err();
        assert_eq!(err.code(), ErrorCode::TableNotDefined);
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_routing_granularity_follows_family() {
        let define = orders(Some(ShardingRule {
            database: Some("shop_{region}".to_string()),
            table: Some("orders_{region}".to_string()),
        }));
        let bag = ValueBag::from_row(&Row::from([("region".to_string(), json!("eu"))]));

        let distribute = SchemaSupport::new(DialectType::Distribute, vec![], "main");
        assert_eq!(
            distribute.route(&define, &bag).unwrap(),
            RoutingKey::Database("shop_eu".to_string())
        );
        let remote = SchemaSupport::new(DialectType::Remote, vec![], "main");
        assert_eq!(
            remote.route(&define, &bag).unwrap(),
            RoutingKey::Table("orders_eu".to_string())
        );
    }

    #[test]
    fn test_unsharded_route_defaults() {
        let distribute = SchemaSupport::new(DialectType::Distribute, vec![orders(None)], "main");
        let targets = distribute.unsharded_targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].0, RoutingKey::Database("main".to_string()));

        let sharded = SchemaSupport::new(
            DialectType::Relational,
            vec![orders(Some(ShardingRule::table("orders_{region}")))],
            "main",
        );
        assert!(sharded.unsharded_targets().is_empty());
        assert_eq!(sharded.sharded_tables().len(), 1);
    }

    #[test]
    fn test_projection_parsing() {
        let support = SchemaSupport::new(DialectType::Relational, vec![], "main");
        let define = orders(None);
        assert_eq!(
            support.projection(&define, "").unwrap(),
            vec!["id", "Region", "total"]
        );
        assert_eq!(
            support.projection(&define, " region , total,").unwrap(),
            vec!["Region", "total"]
        );

        let empty = TableDefine::new("empty", None, vec![], vec![]);
        let err = support.projection(&empty, " , ").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoColumnsToProject);
    }

    #[test]
    fn test_prepare_insert_fills_uuid_generator_only_when_absent() {
        let support = SchemaSupport::new(DialectType::Relational, vec![], "main");
        let define = orders(None);

        let prepared = support.prepare_insert(&define, &Row::from([("total".to_string(), json!(3))]));
        let id = prepared["id"].as_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());

        let given = Row::from([("ID".to_string(), json!("fixed"))]);
        let prepared = support.prepare_insert(&define, &given);
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared["ID"], "fixed");
    }

    #[test]
    fn test_normalize_uses_declared_spelling() {
        let support = SchemaSupport::new(DialectType::Relational, vec![], "main");
        let row = Row::from([
            ("region".to_string(), json!("eu")),
            ("row_count".to_string(), json!(1)),
        ]);
        let row = support.normalize(&orders(None), row);
        assert_eq!(row["Region"], "eu");
        assert_eq!(row["row_count"], 1);
    }

    #[test]
    fn test_sharding_init_is_claimed_once() {
        let support = SchemaSupport::new(DialectType::Relational, vec![], "main");
        assert!(support.claim_sharding_init());
        assert!(!support.claim_sharding_init());
    }

    #[test]
    fn test_duplicate_definitions_replace_earlier() {
        let replacement = TableDefine::new("ORDERS", None, vec![], vec![]);
        let support = SchemaSupport::new(
            DialectType::Relational,
            vec![orders(None), replacement],
            "main",
        );
        assert_eq!(support.tables().len(), 1);
        assert_eq!(support.table("orders").unwrap().name(), "ORDERS");
    }
}
