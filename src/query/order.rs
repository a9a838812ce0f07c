use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    #[default]
    Asc,
    Desc,
}

/// Sort key of a query. Two `OrderBy` values are equal when they name the same
/// `(table, column)` pair, whatever their direction or sort code.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub table: String,
    pub column: String,
    pub order: OrderType,
    pub sort_code: i32,
}

impl OrderBy {
    pub fn new(table: &str, column: &str, order: OrderType) -> Self {
        Self {
            table: table.trim().to_string(),
            column: column.trim().to_string(),
            order,
            sort_code: super::condition::DEFAULT_SORT_CODE,
        }
    }

    pub fn sort_code(mut self, sort_code: i32) -> Self {
        self.sort_code = sort_code.max(super::condition::DEFAULT_SORT_CODE);
        self
    }

    pub fn matches(&self, table: &str, column: &str) -> bool {
        self.table == table.trim() && self.column == column.trim()
    }
}

impl PartialEq for OrderBy {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.table, &other.column)
    }
}

impl Eq for OrderBy {}
