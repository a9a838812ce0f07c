//! Backend-agnostic row representation.
//!
//! Every dialect reply is normalised into [`Row`] maps of column name to a dynamically typed
//! value. An absent result is an empty map or an empty list, never a null.

use serde_json::Value;
use std::collections::HashMap;

/// Column name to value.
pub type Row = HashMap<String, Value>;

/// Case-insensitive lookup of a column value.
pub fn get_ignore_case<'a>(row: &'a Row, column: &str) -> Option<&'a Value> {
    row.get(column).or_else(|| {
        row.iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    })
}

/// Render a scalar value the way it appears in a physical name (sharding suffixes, logs).
pub fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
