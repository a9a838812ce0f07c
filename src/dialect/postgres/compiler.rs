//! PostgreSQL command compiler.
//!
//! Turns condition trees, query descriptors and table definitions into
//! [`GeneratedCommand`]s using `SeaQuery`'s `PostgresQueryBuilder`. Placeholders are `$n` and
//! `parameters` follow placeholder order.
//!
//! Sibling conditions are combined with SQL precedence in mind: a group's children are split
//! into runs at every `OR` connection, each run becomes an `AND` chain, and the runs are
//! `OR`-ed together. `a AND b OR c AND d` therefore compiles to `(a AND b) OR (c AND d)`.

use crate::define::TableDefine;
use crate::error::{BridgeError, ErrorCode, Result};
use crate::query::condition::{or_runs, sorted};
use crate::query::value_conversion::json_to_value;
use crate::query::{
    ColumnCondition, Condition, ConditionCode, ConnectionCode, FunctionItem, GeneratedCommand,
    JoinType, Name, Parameter, QueryInfo, QueryJoin,
};
use crate::row::{get_ignore_case, Row};
use sea_query::{
    Condition as SqlCondition, Expr, ExprTrait, Func, Index, Order, PostgresQueryBuilder,
    Query, SelectStatement, Table,
};
use serde_json::Value as JsonValue;

fn column_ref(table: &str, column: &str) -> Expr {
    if table.is_empty() {
        Expr::col(Name::new(column))
    } else {
        Expr::col((Name::new(table), Name::new(column)))
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Compile top-level conditions; they combine like the children of an implicit group.
pub fn compile_conditions(conditions: &[Condition]) -> Result<Option<SqlCondition>> {
    let ordered = sorted(conditions);
    let mut compiled_runs = Vec::new();
    for run in or_runs(&ordered) {
        let mut all = SqlCondition::all();
        let mut members = 0;
        for condition in run {
            if let Some(compiled) = compile_node(condition)? {
                all = all.add(compiled);
                members += 1;
            }
        }
        if members > 0 {
            compiled_runs.push(all);
        }
    }

    Ok(match compiled_runs.len() {
        0 => None,
        1 => compiled_runs.pop(),
        _ => Some(
            compiled_runs
                .into_iter()
                .fold(SqlCondition::any(), |any, run| any.add(run)),
        ),
    })
}

fn compile_node(condition: &Condition) -> Result<Option<SqlCondition>> {
    match condition {
        Condition::Column(column) => {
            Ok(Some(SqlCondition::all().add(compile_column(column)?)))
        }
        Condition::Group(group) => compile_conditions(&group.conditions),
        Condition::Constant(constant) => {
            let literal = if constant.outcome { "TRUE" } else { "FALSE" };
            Ok(Some(SqlCondition::all().add(Expr::cust(literal))))
        }
    }
}

fn mismatch(condition: &ColumnCondition) -> BridgeError {
    BridgeError::usage(
        ErrorCode::ConditionMismatch,
        &[&condition.code.name(), &condition.parameter.kind_name()],
    )
}

/// Scalar operand: column, constant or function call.
fn operand(parameter: &Parameter) -> Option<Result<Expr>> {
    match parameter {
        Parameter::Column { table, column } => Some(Ok(column_ref(table, column))),
        Parameter::Constant(value) => Some(Ok(Expr::val(json_to_value(value)))),
        Parameter::Function(function) => Some(function_expr(function)),
        _ => None,
    }
}

fn function_expr(function: &FunctionItem) -> Result<Expr> {
    let mut arguments = Vec::with_capacity(function.arguments.len());
    for argument in &function.arguments {
        match operand(argument) {
            Some(expr) => arguments.push(expr?),
            None => {
                return Err(BridgeError::usage(
                    ErrorCode::ConditionMismatch,
                    &[&function.name, &argument.kind_name()],
                ))
            }
        }
    }
    Ok(Func::cust(Name::new(&function.name)).args(arguments).into())
}

fn like_pattern(condition: &ColumnCondition) -> Result<String> {
    let text = match &condition.parameter {
        Parameter::Constant(JsonValue::String(text)) => text,
        _ => return Err(mismatch(condition)),
    };
    Ok(match condition.code {
        ConditionCode::Contains => format!("%{}%", escape_like(text)),
        ConditionCode::StartsWith => format!("{}%", escape_like(text)),
        ConditionCode::EndsWith => format!("%{}", escape_like(text)),
        _ => text.clone(),
    })
}

fn compile_column(condition: &ColumnCondition) -> Result<Expr> {
    let left = column_ref(&condition.table, &condition.column);
    let scalar = || operand(&condition.parameter).unwrap_or_else(|| Err(mismatch(condition)));

    let expr = match condition.code {
        ConditionCode::Equal => match &condition.parameter {
            Parameter::Constant(JsonValue::Null) => left.is_null(),
            _ => left.eq(scalar()?),
        },
        ConditionCode::NotEqual => match &condition.parameter {
            Parameter::Constant(JsonValue::Null) => left.is_not_null(),
            _ => left.ne(scalar()?),
        },
        ConditionCode::Greater => left.gt(scalar()?),
        ConditionCode::GreaterEqual => left.gte(scalar()?),
        ConditionCode::Less => left.lt(scalar()?),
        ConditionCode::LessEqual => left.lte(scalar()?),
        ConditionCode::Like
        | ConditionCode::Contains
        | ConditionCode::StartsWith
        | ConditionCode::EndsWith => left.like(like_pattern(condition)?),
        ConditionCode::NotLike => left.not_like(like_pattern(condition)?),
        ConditionCode::In | ConditionCode::NotIn => {
            let negate = condition.code == ConditionCode::NotIn;
            match &condition.parameter {
                Parameter::Array(values) => {
                    let values: Vec<sea_query::Value> = values.iter().map(json_to_value).collect();
                    if negate {
                        left.is_not_in(values)
                    } else {
                        left.is_in(values)
                    }
                }
                Parameter::Constant(value) => {
                    let values = vec![json_to_value(value)];
                    if negate {
                        left.is_not_in(values)
                    } else {
                        left.is_in(values)
                    }
                }
                Parameter::Query(info) => {
                    let subquery = build_select(info, &info.table, &[])?;
                    if negate {
                        left.not_in_subquery(subquery)
                    } else {
                        left.in_subquery(subquery)
                    }
                }
                _ => return Err(mismatch(condition)),
            }
        }
        ConditionCode::Between | ConditionCode::NotBetween => match &condition.parameter {
            Parameter::Ranges { begin, end } => {
                let begin = Expr::val(json_to_value(begin));
                let end = Expr::val(json_to_value(end));
                if condition.code == ConditionCode::Between {
                    left.between(begin, end)
                } else {
                    left.not_between(begin, end)
                }
            }
            _ => return Err(mismatch(condition)),
        },
        ConditionCode::IsNull => left.is_null(),
        ConditionCode::IsNotNull => left.is_not_null(),
    };
    Ok(expr)
}

fn join_condition(join: &QueryJoin) -> Result<SqlCondition> {
    if join.edges.is_empty() {
        return Err(BridgeError::usage(
            ErrorCode::MissingTableMetadata,
            &[&join.table, &"join key"],
        ));
    }
    let mut runs: Vec<SqlCondition> = Vec::new();
    let mut current = SqlCondition::all();
    for (index, edge) in join.edges.iter().enumerate() {
        if index > 0 && edge.connection == ConnectionCode::Or {
            runs.push(current);
            current = SqlCondition::all();
        }
        current = current.add(Expr::cust(format!(
            "{}.{} = {}.{}",
            quote_ident(&edge.left_table),
            quote_ident(&edge.left_key),
            quote_ident(&join.table),
            quote_ident(&edge.right_key)
        )));
    }
    runs.push(current);
    if runs.len() == 1 {
        Ok(runs.remove(0))
    } else {
        Ok(runs
            .into_iter()
            .fold(SqlCondition::any(), |any, run| any.add(run)))
    }
}

fn sql_join_type(join_type: JoinType) -> sea_query::JoinType {
    match join_type {
        JoinType::Inner => sea_query::JoinType::InnerJoin,
        JoinType::Left => sea_query::JoinType::LeftJoin,
        JoinType::Right => sea_query::JoinType::RightJoin,
        JoinType::Full => sea_query::JoinType::FullOuterJoin,
    }
}

/// Build the `SELECT` for `info`. `physical` replaces the logical driving table in `FROM`
/// (aliased back to the logical name so conditions keep resolving).
fn build_select(
    info: &QueryInfo,
    physical: &str,
    default_projection: &[String],
) -> Result<SelectStatement> {
    let mut select = Query::select();
    if physical == info.table {
        select.from(Name::new(physical));
    } else {
        select.from_as(Name::new(physical), Name::new(&info.table));
    }

    if info.items.is_empty() {
        if default_projection.is_empty() {
            return Err(BridgeError::usage(
                ErrorCode::NoColumnsToProject,
                &[&info.table],
            ));
        }
        for column in default_projection {
            select.expr(column_ref(&info.table, column));
        }
    } else {
        for item in &info.items {
            let column = column_ref(&item.table, &item.column);
            match &item.alias {
                Some(alias) => {
                    select.expr_as(column, Name::new(alias));
                }
                None => {
                    select.expr(column);
                }
            }
        }
    }

    if info.distinct {
        select.distinct();
    }

    for join in &info.joins {
        let on = join_condition(join)?;
        select.join(sql_join_type(join.join_type), Name::new(&join.table), on);
    }

    if let Some(condition) = compile_conditions(&info.conditions)? {
        select.cond_where(condition);
    }

    if !info.group_by.is_empty() {
        select.add_group_by(
            info.group_by
                .iter()
                .map(|item| column_ref(&item.table, &item.column)),
        );
    }

    let mut orders: Vec<_> = info.order_by.iter().collect();
    orders.sort_by_key(|order| order.sort_code);
    for order in orders {
        let direction = match order.order {
            crate::query::OrderType::Asc => Order::Asc,
            crate::query::OrderType::Desc => Order::Desc,
        };
        select.order_by_expr(column_ref(&order.table, &order.column), direction);
    }

    if let Some(pager) = info.pager {
        select.limit(pager.page_size);
        if pager.offset() > 0 {
            select.offset(pager.offset());
        }
    }

    Ok(select)
}

fn finish(select: SelectStatement, for_update: bool) -> GeneratedCommand {
    let (mut sql, values) = select.build(PostgresQueryBuilder);
    if for_update {
        sql.push_str(" FOR UPDATE");
    }
    GeneratedCommand::new(sql, values.0)
}

pub fn compile_select(
    define: &TableDefine,
    physical: &str,
    info: &QueryInfo,
) -> Result<GeneratedCommand> {
    let select = build_select(info, physical, &define.projection())?;
    Ok(finish(select, info.for_update))
}

/// `SELECT COUNT(*)` over the query with ordering, paging and locking removed.
pub fn compile_count(
    define: &TableDefine,
    physical: &str,
    info: &QueryInfo,
) -> Result<GeneratedCommand> {
    let mut inner = info.clone();
    inner.order_by.clear();
    inner.pager = None;
    inner.for_update = false;
    let (sql, values) = build_select(&inner, physical, &define.projection())?
        .build(PostgresQueryBuilder);
    Ok(GeneratedCommand::new(
        format!("SELECT COUNT(*) FROM ({sql}) AS count_subquery"),
        values.0,
    ))
}

/// Single-row lookup projecting `columns` (all declared columns when empty).
pub fn compile_retrieve(
    define: &TableDefine,
    physical: &str,
    filter: &[Condition],
    columns: &[String],
    limit_one: bool,
    for_update: bool,
) -> Result<GeneratedCommand> {
    let mut info = QueryInfo::new(define.name());
    info.conditions = filter.to_vec();
    info.items = columns
        .iter()
        .map(|c| crate::query::QueryItem::new(define.name(), c))
        .collect();
    if limit_one {
        info.pager = Some(crate::query::Pager {
            page: 1,
            page_size: 1,
        });
    }
    let select = build_select(&info, physical, &define.projection())?;
    Ok(finish(select, for_update))
}

pub fn compile_insert(define: &TableDefine, physical: &str, data: &Row) -> Result<GeneratedCommand> {
    let mut columns = Vec::new();
    let mut values = Vec::new();
    for column in define.columns() {
        if let Some(value) = get_ignore_case(data, &column.name) {
            columns.push(Name::new(&column.name));
            values.push(Expr::val(json_to_value(value)));
        }
    }
    if columns.is_empty() {
        return Err(BridgeError::usage(ErrorCode::EmptyPayload, &[&define.name()]));
    }

    let mut insert = Query::insert();
    insert.into_table(Name::new(physical));
    insert.columns(columns);
    insert.values_panic(values);
    insert.returning_all();
    let (sql, values) = insert.build(PostgresQueryBuilder);
    Ok(GeneratedCommand::new(sql, values.0))
}

/// `UPDATE` of every declared non-key column present in `data`.
pub fn compile_update(
    define: &TableDefine,
    physical: &str,
    data: &Row,
    filter: &[Condition],
) -> Result<GeneratedCommand> {
    let condition = compile_conditions(filter)?.ok_or_else(|| {
        BridgeError::usage(ErrorCode::EmptyFilter, &[&define.name(), &"update"])
    })?;

    let mut update = Query::update();
    update.table(Name::new(physical));
    let mut assigned = 0;
    for column in define.columns().iter().filter(|c| !c.primary_key) {
        if let Some(value) = get_ignore_case(data, &column.name) {
            update.value(Name::new(&column.name), Expr::val(json_to_value(value)));
            assigned += 1;
        }
    }
    if assigned == 0 {
        return Err(BridgeError::usage(ErrorCode::EmptyPayload, &[&define.name()]));
    }
    update.cond_where(condition);
    let (sql, values) = update.build(PostgresQueryBuilder);
    Ok(GeneratedCommand::new(
        retarget(&sql, define.name(), physical),
        values.0,
    ))
}

pub fn compile_delete(
    define: &TableDefine,
    physical: &str,
    filter: &[Condition],
) -> Result<GeneratedCommand> {
    let condition = compile_conditions(filter)?.ok_or_else(|| {
        BridgeError::usage(ErrorCode::EmptyFilter, &[&define.name(), &"delete"])
    })?;
    let mut delete = Query::delete();
    delete.from_table(Name::new(physical));
    delete.cond_where(condition);
    let (sql, values) = delete.build(PostgresQueryBuilder);
    Ok(GeneratedCommand::new(
        retarget(&sql, define.name(), physical),
        values.0,
    ))
}

/// `UPDATE`/`DELETE` cannot alias their target in every builder, so qualified references to
/// the logical table are rewritten to the physical one.
fn retarget(sql: &str, logical: &str, physical: &str) -> String {
    if logical == physical {
        return sql.to_string();
    }
    sql.replace(
        &format!("{}.", quote_ident(logical)),
        &format!("{}.", quote_ident(physical)),
    )
}

/// `CREATE TABLE IF NOT EXISTS` followed by one `CREATE INDEX IF NOT EXISTS` per index.
pub fn compile_create_table(define: &TableDefine, physical: &str) -> Result<Vec<GeneratedCommand>> {
    if define.columns().is_empty() {
        return Err(BridgeError::usage(
            ErrorCode::MissingTableMetadata,
            &[&define.name(), &"column"],
        ));
    }

    let mut create = Table::create();
    create.table(Name::new(physical)).if_not_exists();
    let keys: Vec<_> = define.primary_keys().collect();
    for column in define.columns() {
        let mut def = column.to_column_def();
        if keys.len() == 1 && column.primary_key {
            def.primary_key();
        }
        create.col(&mut def);
    }
    if keys.len() > 1 {
        let mut primary = Index::create();
        for key in &keys {
            primary.col(Name::new(&key.name));
        }
        create.primary_key(&mut primary);
    }

    let mut commands = vec![GeneratedCommand::text(create.build(PostgresQueryBuilder))];
    for index in define.indexes() {
        if index.columns.is_empty() {
            return Err(BridgeError::usage(
                ErrorCode::MissingTableMetadata,
                &[&define.name(), &format!("index {}", index.name)],
            ));
        }
        let name = if physical == define.name() {
            index.name.clone()
        } else {
            format!("{}_{}", index.name, physical)
        };
        let mut statement = Index::create();
        statement
            .if_not_exists()
            .name(name)
            .table(Name::new(physical));
        for column in &index.columns {
            statement.col(Name::new(column));
        }
        if index.unique {
            statement.unique();
        }
        commands.push(GeneratedCommand::text(statement.build(PostgresQueryBuilder)));
    }
    Ok(commands)
}

pub fn compile_truncate(physical: &str) -> GeneratedCommand {
    let statement = Table::truncate().table(Name::new(physical)).to_owned();
    GeneratedCommand::text(statement.build(PostgresQueryBuilder))
}

pub fn compile_drop(physical: &str) -> GeneratedCommand {
    let statement = Table::drop()
        .table(Name::new(physical))
        .if_exists()
        .to_owned();
    GeneratedCommand::text(statement.build(PostgresQueryBuilder))
}
