//! Sharding key resolution.
//!
//! A [`ShardingRule`] carries up to two templates: one naming the physical database and one
//! naming the physical table. Placeholders are `{column}` (the value itself) and
//! `{column%N}` (a non-negative integer bucket). Resolution is a pure function of the table
//! definition and the [`ValueBag`] drawn from the operation's own payload.

use super::table::TableDefine;
use crate::error::{BridgeError, ErrorCode, Result};
use crate::query::condition::{or_runs, sorted};
use crate::query::{Condition, ConditionCode, Parameter};
use crate::row::{value_to_plain_string, Row};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:%\s*(\d+)\s*)?\}")
        .expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingRule {
    /// Template for the physical database, e.g. `tenant_{tenant_id%4}`.
    #[serde(default)]
    pub database: Option<String>,
    /// Template for the physical table, e.g. `orders_{region}`.
    #[serde(default)]
    pub table: Option<String>,
}

impl ShardingRule {
    pub fn database(template: impl Into<String>) -> Self {
        Self {
            database: Some(template.into()),
            table: None,
        }
    }

    pub fn table(template: impl Into<String>) -> Self {
        Self {
            database: None,
            table: Some(template.into()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.database.as_deref().is_some_and(|t| !t.trim().is_empty())
            || self.table.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    /// Column names referenced by either template.
    pub fn columns(&self) -> Vec<String> {
        let mut names = Vec::new();
        for template in [&self.database, &self.table].into_iter().flatten() {
            for caps in PLACEHOLDER.captures_iter(template) {
                let name = caps[1].to_lowercase();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}

/// Values available for placeholder substitution, keyed by lower-cased column name.
///
/// Columns whose conditions admit more than one value are kept as conflicts so that
/// resolution refuses them instead of picking one shard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueBag {
    values: HashMap<String, Value>,
    conflicts: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Binding {
    Value(Value),
    Conflict,
}

impl Binding {
    fn merge(self, other: Binding) -> Binding {
        match (self, other) {
            (Binding::Value(a), Binding::Value(b)) if a == b => Binding::Value(a),
            _ => Binding::Conflict,
        }
    }
}

/// Equalities every matching row satisfies: within one `AND` run they accumulate, across
/// `OR` runs only columns bound in every run survive.
fn required_bindings(conditions: &[Condition]) -> HashMap<String, Binding> {
    let ordered = sorted(conditions);
    let mut runs = or_runs(&ordered).into_iter().map(|run| run_bindings(&run));
    let Some(first) = runs.next() else {
        return HashMap::new();
    };
    runs.fold(first, |acc, next| {
        acc.into_iter()
            .filter_map(|(name, binding)| {
                let other = next.get(&name)?.clone();
                Some((name, binding.merge(other)))
            })
            .collect()
    })
}

fn run_bindings(run: &[&Condition]) -> HashMap<String, Binding> {
    let mut bindings: HashMap<String, Binding> = HashMap::new();
    let mut bind = |name: String, binding: Binding| {
        let merged = match bindings.remove(&name) {
            Some(existing) => existing.merge(binding),
            None => binding,
        };
        bindings.insert(name, merged);
    };
    for condition in run {
        match condition {
            Condition::Column(column) if column.code == ConditionCode::Equal => {
                if let Parameter::Constant(value) = &column.parameter {
                    bind(column.column.to_lowercase(), Binding::Value(value.clone()));
                }
            }
            Condition::Group(group) => {
                for (name, binding) in required_bindings(&group.conditions) {
                    bind(name, binding);
                }
            }
            _ => {}
        }
    }
    bindings
}

impl ValueBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_row(row: &Row) -> Self {
        let mut bag = Self::new();
        for (name, value) in row {
            bag.insert(name, value.clone());
        }
        bag
    }

    /// Collect the `column = constant` conditions every matching row must satisfy,
    /// descending into groups.
    pub fn from_conditions(conditions: &[Condition]) -> Self {
        let mut bag = Self::new();
        bag.absorb_conditions(conditions);
        bag
    }

    /// Add values from a data map without overwriting existing entries.
    pub fn absorb_row(&mut self, row: &Row) {
        for (name, value) in row {
            let name = name.trim().to_lowercase();
            if self.conflicts.contains(&name) {
                continue;
            }
            self.values.entry(name).or_insert_with(|| value.clone());
        }
    }

    /// Add values from a condition list. Columns already present are kept; a column the
    /// conditions leave ambiguous becomes a conflict.
    pub fn absorb_conditions(&mut self, conditions: &[Condition]) {
        for (name, binding) in required_bindings(conditions) {
            if self.values.contains_key(&name) || self.conflicts.contains(&name) {
                continue;
            }
            match binding {
                Binding::Value(value) => {
                    self.values.insert(name, value);
                }
                Binding::Conflict => {
                    self.conflicts.insert(name);
                }
            }
        }
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        let name = name.trim().to_lowercase();
        self.conflicts.remove(&name);
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(&name.trim().to_lowercase())
    }

    /// Whether the conditions allow more than one value for `name`.
    pub fn is_conflicted(&self, name: &str) -> bool {
        self.conflicts.contains(&name.trim().to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.conflicts.is_empty()
    }
}

/// Substitute every placeholder of `template` from `bag`.
///
/// # Errors
///
/// - `ShardingValueMissing` (usage) when a referenced column has no non-null value
/// - `InvalidValue` (usage) when a `%N` bucket is applied to a non-integer value, or when the
///   conditions allow several values for a referenced column
/// - `InvalidConfiguration` when a template uses `%0`
pub fn resolve_template(table: &str, template: &str, bag: &ValueBag) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 8);
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&template[last..whole.start()]);
        last = whole.end();

        let column = &caps[1];
        if bag.is_conflicted(column) {
            return Err(BridgeError::usage(
                ErrorCode::InvalidValue,
                &[&column, &format!("conditions on {table} allow more than one sharding value")],
            ));
        }
        let value = match bag.get(column) {
            Some(value) if !value.is_null() => value,
            _ => {
                return Err(BridgeError::usage(
                    ErrorCode::ShardingValueMissing,
                    &[&table, &column],
                ))
            }
        };

        match caps.get(2) {
            None => out.push_str(&value_to_plain_string(value)),
            Some(modulus) => {
                let modulus: i128 = modulus.as_str().parse().unwrap_or(0);
                if modulus <= 0 {
                    return Err(BridgeError::configuration(
                        ErrorCode::InvalidConfiguration,
                        &[&format!("sharding template {template} uses a zero modulus")],
                    ));
                }
                let number = integer_of(value).ok_or_else(|| {
                    BridgeError::usage(
                        ErrorCode::InvalidValue,
                        &[&column, &format!("{value} is not an integer sharding value")],
                    )
                })?;
                out.push_str(&number.rem_euclid(modulus).to_string());
            }
        }
    }
    out.push_str(&template[last..]);
    Ok(out)
}

fn integer_of(value: &Value) -> Option<i128> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Physical table for `define`. No table template resolves to the logical name.
pub fn sharding_table(define: &TableDefine, bag: &ValueBag) -> Result<String> {
    match define
        .sharding()
        .and_then(|rule| rule.table.as_deref())
        .filter(|t| !t.trim().is_empty())
    {
        Some(template) => resolve_template(define.name(), template, bag),
        None => Ok(define.name().to_string()),
    }
}

/// Physical database for `define`. No database template resolves to `default_database`.
pub fn sharding_database(
    define: &TableDefine,
    bag: &ValueBag,
    default_database: &str,
) -> Result<String> {
    match define
        .sharding()
        .and_then(|rule| rule.database.as_deref())
        .filter(|t| !t.trim().is_empty())
    {
        Some(template) => resolve_template(define.name(), template, bag),
        None => Ok(default_database.to_string()),
    }
}
