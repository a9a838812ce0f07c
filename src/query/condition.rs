//! Condition tree
//!
//! Callers build conditions bottom-up and hand the finished tree to a schema operation.
//! Within a group each child combines with its *preceding sibling* by its own connection
//! code, so a single group can mix `AND` and `OR`. Sort codes order siblings at compile time;
//! negative sort codes normalise to [`DEFAULT_SORT_CODE`].

use super::parameter::Parameter;
use serde::{Deserialize, Serialize};

/// Sort code assigned to conditions that do not ask for a position.
pub const DEFAULT_SORT_CODE: i32 = 0;

fn normalize_sort_code(sort_code: i32) -> i32 {
    if sort_code < 0 {
        DEFAULT_SORT_CODE
    } else {
        sort_code
    }
}

/// How a node combines with its preceding sibling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionCode {
    #[default]
    And,
    Or,
}

/// Comparison operator of a column condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionCode {
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Like,
    NotLike,
    Contains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    Between,
    NotBetween,
    IsNull,
    IsNotNull,
}

impl ConditionCode {
    pub fn name(self) -> &'static str {
        match self {
            ConditionCode::Equal => "equal",
            ConditionCode::NotEqual => "not_equal",
            ConditionCode::Greater => "greater",
            ConditionCode::GreaterEqual => "greater_equal",
            ConditionCode::Less => "less",
            ConditionCode::LessEqual => "less_equal",
            ConditionCode::Like => "like",
            ConditionCode::NotLike => "not_like",
            ConditionCode::Contains => "contains",
            ConditionCode::StartsWith => "starts_with",
            ConditionCode::EndsWith => "ends_with",
            ConditionCode::In => "in",
            ConditionCode::NotIn => "not_in",
            ConditionCode::Between => "between",
            ConditionCode::NotBetween => "not_between",
            ConditionCode::IsNull => "is_null",
            ConditionCode::IsNotNull => "is_not_null",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnCondition {
    pub sort_code: i32,
    pub connection: ConnectionCode,
    pub code: ConditionCode,
    pub table: String,
    pub column: String,
    pub parameter: Parameter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupCondition {
    pub sort_code: i32,
    pub connection: ConnectionCode,
    pub conditions: Vec<Condition>,
}

/// Fixed outcome, e.g. an always-false guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantCondition {
    pub sort_code: i32,
    pub connection: ConnectionCode,
    pub outcome: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Column(ColumnCondition),
    Group(GroupCondition),
    Constant(ConstantCondition),
}

impl Condition {
    /// Group `conditions`, keeping their order. Returns `None` for an empty list.
    pub fn group(
        sort_code: i32,
        connection: ConnectionCode,
        conditions: Vec<Condition>,
    ) -> Option<Condition> {
        if conditions.is_empty() {
            return None;
        }
        Some(Condition::Group(GroupCondition {
            sort_code: normalize_sort_code(sort_code),
            connection,
            conditions,
        }))
    }

    pub fn column(
        sort_code: i32,
        connection: ConnectionCode,
        code: ConditionCode,
        table: &str,
        column: &str,
        parameter: Parameter,
    ) -> Condition {
        Condition::Column(ColumnCondition {
            sort_code: normalize_sort_code(sort_code),
            connection,
            code,
            table: table.trim().to_string(),
            column: column.trim().to_string(),
            parameter,
        })
    }

    pub fn constant(sort_code: i32, connection: ConnectionCode, outcome: bool) -> Condition {
        Condition::Constant(ConstantCondition {
            sort_code: normalize_sort_code(sort_code),
            connection,
            outcome,
        })
    }

    /// Shorthand for an `AND`-connected equality on a constant.
    pub fn equal(table: &str, column: &str, value: impl Into<serde_json::Value>) -> Condition {
        Condition::column(
            DEFAULT_SORT_CODE,
            ConnectionCode::And,
            ConditionCode::Equal,
            table,
            column,
            Parameter::Constant(value.into()),
        )
    }

    pub fn sort_code(&self) -> i32 {
        match self {
            Condition::Column(c) => c.sort_code,
            Condition::Group(g) => g.sort_code,
            Condition::Constant(c) => c.sort_code,
        }
    }

    pub fn connection(&self) -> ConnectionCode {
        match self {
            Condition::Column(c) => c.connection,
            Condition::Group(g) => g.connection,
            Condition::Constant(c) => c.connection,
        }
    }

    /// Depth of the tree rooted here; a leaf has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            Condition::Group(g) => {
                1 + g.conditions.iter().map(Condition::depth).max().unwrap_or(0)
            }
            _ => 1,
        }
    }
}

/// Siblings ordered by sort code; equal codes keep their input order.
pub fn sorted(conditions: &[Condition]) -> Vec<&Condition> {
    let mut ordered: Vec<&Condition> = conditions.iter().collect();
    ordered.sort_by_key(|c| c.sort_code());
    ordered
}

/// Split ordered siblings into `OR`-separated runs of `AND`-connected conditions.
///
/// The first sibling's connection code has no predecessor and is ignored.
pub fn or_runs<'a>(ordered: &[&'a Condition]) -> Vec<Vec<&'a Condition>> {
    let mut runs: Vec<Vec<&Condition>> = Vec::new();
    for (index, condition) in ordered.iter().enumerate() {
        if index == 0 || condition.connection() == ConnectionCode::Or {
            runs.push(vec![*condition]);
        } else if let Some(run) = runs.last_mut() {
            run.push(*condition);
        }
    }
    runs
}
