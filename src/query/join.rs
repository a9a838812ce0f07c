use super::condition::ConnectionCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

/// One join edge: `left_table.left_key = <joined table>.right_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    pub connection: ConnectionCode,
    pub left_table: String,
    pub left_key: String,
    pub right_key: String,
}

impl JoinInfo {
    pub fn new(left_table: &str, left_key: &str, right_key: &str) -> Self {
        Self {
            connection: ConnectionCode::And,
            left_table: left_table.trim().to_string(),
            left_key: left_key.trim().to_string(),
            right_key: right_key.trim().to_string(),
        }
    }

    pub fn or(mut self) -> Self {
        self.connection = ConnectionCode::Or;
        self
    }
}

/// A joined table and the ordered edges connecting it to the tables before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryJoin {
    pub join_type: JoinType,
    pub table: String,
    pub edges: Vec<JoinInfo>,
}

impl QueryJoin {
    pub fn new(join_type: JoinType, table: &str, edges: Vec<JoinInfo>) -> Self {
        Self {
            join_type,
            table: table.trim().to_string(),
            edges,
        }
    }
}
