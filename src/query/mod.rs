//! Query and condition model.
//!
//! Callers describe filters and queries with these types; every dialect walks the same trees
//! and turns them into its native command form ([`GeneratedCommand`] for the relational
//! dialect, a JSON document for the remote one).

pub mod command;
pub mod condition;
pub mod info;
pub mod join;
pub mod order;
pub mod parameter;
pub mod value_conversion;

pub use command::GeneratedCommand;
pub use condition::{
    ColumnCondition, Condition, ConditionCode, ConnectionCode, ConstantCondition,
    GroupCondition, DEFAULT_SORT_CODE,
};
pub use info::{Pager, QueryInfo, QueryItem};
pub use join::{JoinInfo, JoinType, QueryJoin};
pub use order::{OrderBy, OrderType};
pub use parameter::{FunctionItem, Parameter};

use crate::row::Row;
use sea_query::Iden;

/// Runtime identifier for `SeaQuery` statements (table, column, alias or function names
/// that are only known from configuration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name(String);

impl Name {
    pub fn new(name: &str) -> Self {
        Name(name.trim().to_string())
    }
}

impl Iden for Name {
    fn unquoted(&self) -> &str {
        &self.0
    }
}

/// Equality conditions for every entry of a filter map, ordered by column name so the
/// generated command is stable.
pub fn filter_conditions(table: &str, filter: &Row) -> Vec<Condition> {
    let mut keys: Vec<&String> = filter.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|key| Condition::equal(table, key, filter[key].clone()))
        .collect()
}
