//! Query descriptor passed to the query family of operations.

use super::condition::Condition;
use super::join::QueryJoin;
use super::order::OrderBy;

/// Projected column, optionally aliased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryItem {
    pub table: String,
    pub column: String,
    pub alias: Option<String>,
}

impl QueryItem {
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            table: table.trim().to_string(),
            column: column.trim().to_string(),
            alias: None,
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.trim().to_string());
        self
    }
}

/// 1-based page number plus page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pager {
    pub page: u64,
    pub page_size: u64,
}

impl Pager {
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }
}

/// Query descriptor
///
/// `table` is the logical driving table. Sharded tables are rewritten to their physical name
/// by the dialect; conditions keep referring to the logical name.
///
/// # Examples
///
/// ```no_run
/// use bridgehead::query::{Condition, OrderBy, OrderType, QueryInfo};
///
/// let info = QueryInfo::new("orders")
///     .condition(Condition::equal("orders", "status", "open"))
///     .order_by(OrderBy::new("orders", "created_at", OrderType::Desc))
///     .page(2, 50);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryInfo {
    pub table: String,
    pub items: Vec<QueryItem>,
    pub joins: Vec<QueryJoin>,
    pub conditions: Vec<Condition>,
    pub order_by: Vec<OrderBy>,
    pub group_by: Vec<QueryItem>,
    pub pager: Option<Pager>,
    pub distinct: bool,
    pub for_update: bool,
}

impl QueryInfo {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.trim().to_string(),
            ..Self::default()
        }
    }

    pub fn item(mut self, item: QueryItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn join(mut self, join: QueryJoin) -> Self {
        self.joins.push(join);
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Attach a group if it exists; `Condition::group` returns `None` for no children.
    pub fn condition_opt(mut self, condition: Option<Condition>) -> Self {
        if let Some(condition) = condition {
            self.conditions.push(condition);
        }
        self
    }

    /// Add a sort key. A key for an already ordered `(table, column)` is ignored.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        if !self.order_by.contains(&order) {
            self.order_by.push(order);
        }
        self
    }

    pub fn group_by(mut self, table: &str, column: &str) -> Self {
        self.group_by.push(QueryItem::new(table, column));
        self
    }

    pub fn page(mut self, page: u64, page_size: u64) -> Self {
        self.pager = Some(Pager { page, page_size });
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }
}
