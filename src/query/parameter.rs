//! Right-hand side of a column condition.

use super::info::QueryInfo;
use serde_json::Value;

/// Comparison operand
///
/// `Function` is the recursive case: its arguments are parameters themselves. Trees are built
/// bottom-up by the caller and own their children, so they are always finite and acyclic.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    /// Another column (column-to-column comparison).
    Column { table: String, column: String },
    /// A literal value.
    Constant(Value),
    /// A function call over nested parameters.
    Function(FunctionItem),
    /// Heterogeneous value list for membership tests.
    Array(Vec<Value>),
    /// Closed interval for range tests.
    Ranges { begin: Value, end: Value },
    /// A nested query (subquery).
    Query(Box<QueryInfo>),
}

impl Parameter {
    pub fn column(table: &str, column: &str) -> Self {
        Parameter::Column {
            table: table.trim().to_string(),
            column: column.trim().to_string(),
        }
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Parameter::Constant(value.into())
    }

    pub fn array<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Parameter::Array(values.into_iter().map(Into::into).collect())
    }

    pub fn ranges(begin: impl Into<Value>, end: impl Into<Value>) -> Self {
        Parameter::Ranges {
            begin: begin.into(),
            end: end.into(),
        }
    }

    pub fn function(name: &str, arguments: Vec<Parameter>) -> Self {
        Parameter::Function(FunctionItem::new(name, arguments))
    }

    pub fn query(info: QueryInfo) -> Self {
        Parameter::Query(Box::new(info))
    }

    /// Variant name used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Parameter::Column { .. } => "column",
            Parameter::Constant(_) => "constant",
            Parameter::Function(_) => "function",
            Parameter::Array(_) => "array",
            Parameter::Ranges { .. } => "ranges",
            Parameter::Query(_) => "query",
        }
    }
}

/// Function name plus ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionItem {
    pub name: String,
    pub arguments: Vec<Parameter>,
}

impl FunctionItem {
    pub fn new(name: &str, arguments: Vec<Parameter>) -> Self {
        Self {
            name: name.trim().to_string(),
            arguments,
        }
    }

    /// Nesting depth: 1 for a function with no function arguments.
    pub fn depth(&self) -> usize {
        1 + self
            .arguments
            .iter()
            .map(|arg| match arg {
                Parameter::Function(inner) => inner.depth(),
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }
}
