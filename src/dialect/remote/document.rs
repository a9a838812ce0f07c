//! JSON documents sent to remote endpoints.
//!
//! Condition trees keep their shape: every node carries its sort code and connection code and
//! children stay in sort order, so the remote side can apply the same precedence rules.

use crate::define::TableDefine;
use crate::query::condition::sorted;
use crate::query::{Condition, Parameter, QueryInfo};
use crate::row::Row;
use serde_json::{json, Map, Value};

pub fn condition(condition: &Condition) -> Value {
    match condition {
        Condition::Column(column) => json!({
            "type": "column",
            "sort_code": column.sort_code,
            "connection": column.connection,
            "code": column.code,
            "table": column.table,
            "column": column.column,
            "parameter": parameter(&column.parameter),
        }),
        Condition::Group(group) => json!({
            "type": "group",
            "sort_code": group.sort_code,
            "connection": group.connection,
            "conditions": conditions(&group.conditions),
        }),
        Condition::Constant(constant) => json!({
            "type": "constant",
            "sort_code": constant.sort_code,
            "connection": constant.connection,
            "outcome": constant.outcome,
        }),
    }
}

pub fn conditions(list: &[Condition]) -> Value {
    Value::Array(sorted(list).into_iter().map(condition).collect())
}

pub fn parameter(parameter: &Parameter) -> Value {
    match parameter {
        Parameter::Column { table, column } => {
            json!({ "type": "column", "table": table, "column": column })
        }
        Parameter::Constant(value) => json!({ "type": "constant", "value": value }),
        Parameter::Function(function) => json!({
            "type": "function",
            "name": function.name,
            "arguments": function.arguments.iter().map(self::parameter).collect::<Vec<_>>(),
        }),
        Parameter::Array(values) => json!({ "type": "array", "values": values }),
        Parameter::Ranges { begin, end } => {
            json!({ "type": "ranges", "begin": begin, "end": end })
        }
        Parameter::Query(info) => json!({ "type": "query", "query": query(info) }),
    }
}

pub fn query(info: &QueryInfo) -> Value {
    let items: Vec<Value> = info
        .items
        .iter()
        .map(|item| json!({ "table": item.table, "column": item.column, "alias": item.alias }))
        .collect();
    let joins: Vec<Value> = info
        .joins
        .iter()
        .map(|join| {
            json!({
                "join_type": join.join_type,
                "table": join.table,
                "edges": join.edges.iter().map(|edge| json!({
                    "connection": edge.connection,
                    "left_table": edge.left_table,
                    "left_key": edge.left_key,
                    "right_key": edge.right_key,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    let order_by: Vec<Value> = info
        .order_by
        .iter()
        .map(|order| {
            json!({
                "table": order.table,
                "column": order.column,
                "order": order.order,
                "sort_code": order.sort_code,
            })
        })
        .collect();
    let group_by: Vec<Value> = info
        .group_by
        .iter()
        .map(|item| json!({ "table": item.table, "column": item.column }))
        .collect();

    let mut document = Map::new();
    document.insert("table".to_string(), json!(info.table));
    document.insert("items".to_string(), Value::Array(items));
    document.insert("joins".to_string(), Value::Array(joins));
    document.insert("conditions".to_string(), conditions(&info.conditions));
    document.insert("order_by".to_string(), Value::Array(order_by));
    document.insert("group_by".to_string(), Value::Array(group_by));
    if let Some(pager) = info.pager {
        document.insert(
            "pager".to_string(),
            json!({ "page": pager.page, "page_size": pager.page_size }),
        );
    }
    document.insert("distinct".to_string(), json!(info.distinct));
    document.insert("for_update".to_string(), json!(info.for_update));
    Value::Object(document)
}

/// Declared columns of `define` present in `data`, keyed by declared name.
pub fn declared_data(define: &TableDefine, data: &Row) -> Map<String, Value> {
    define
        .columns()
        .iter()
        .filter_map(|column| {
            crate::row::get_ignore_case(data, &column.name)
                .map(|value| (column.name.clone(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{ConditionCode, ConnectionCode, OrderBy, OrderType};

    #[test]
    fn test_conditions_are_emitted_in_sort_order() {
        let list = vec![
            Condition::column(2, ConnectionCode::And, ConditionCode::Equal, "t", "b", Parameter::constant(2)),
            Condition::column(1, ConnectionCode::Or, ConditionCode::In, "t", "a", Parameter::array([1, 2])),
        ];
        let document = conditions(&list);
        assert_eq!(document[0]["column"], "a");
        assert_eq!(document[0]["connection"], "OR");
        assert_eq!(document[0]["code"], "in");
        assert_eq!(document[0]["parameter"]["values"], json!([1, 2]));
        assert_eq!(document[1]["column"], "b");
    }

    #[test]
    fn test_nested_group_and_function() {
        let inner = Condition::column(
            0,
            ConnectionCode::And,
            ConditionCode::Equal,
            "t",
            "name",
            Parameter::function("upper", vec![Parameter::column("t", "alias")]),
        );
        let group = Condition::group(0, ConnectionCode::And, vec![inner]).unwrap();
        let document = condition(&group);
        assert_eq!(document["type"], "group");
        let parameter = &document["conditions"][0]["parameter"];
        assert_eq!(parameter["name"], "upper");
        assert_eq!(parameter["arguments"][0]["column"], "alias");
    }

    #[test]
    fn test_query_document() {
        let info = QueryInfo::new("orders")
            .condition(Condition::equal("orders", "status", "open"))
            .order_by(OrderBy::new("orders", "id", OrderType::Desc))
            .page(2, 10);
        let document = query(&info);
        assert_eq!(document["table"], "orders");
        assert_eq!(document["pager"]["page_size"], 10);
        assert_eq!(document["order_by"][0]["order"], json!(OrderType::Desc));
        assert_eq!(document["conditions"][0]["parameter"]["value"], "open");
    }
}
