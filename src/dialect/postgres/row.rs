//! Decoding of `may_postgres` rows into [`Row`] maps.

use crate::error::{BridgeError, ErrorCode, Result};
use crate::row::Row;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use may_postgres::types::{FromSql, Type};
use rust_decimal::Decimal;
use serde_json::{json, Value};

fn cell<'a, T>(row: &'a may_postgres::Row, index: usize) -> Result<Option<T>>
where
    T: FromSql<'a>,
{
    row.try_get::<_, Option<T>>(index).map_err(|err| {
        let column = row.columns()[index].name().to_string();
        let message = err.to_string();
        BridgeError::transport_from(
            ErrorCode::Serialization,
            &[&format!("column {column}: {message}")],
            err,
        )
    })
}

fn decode_cell(row: &may_postgres::Row, index: usize) -> Result<Value> {
    let ty = row.columns()[index].type_().clone();
    let value = match ty {
        Type::BOOL => cell::<bool>(row, index)?.map(Value::from),
        Type::INT2 => cell::<i16>(row, index)?.map(Value::from),
        Type::INT4 => cell::<i32>(row, index)?.map(Value::from),
        Type::INT8 => cell::<i64>(row, index)?.map(Value::from),
        Type::OID => cell::<u32>(row, index)?.map(Value::from),
        Type::FLOAT4 => cell::<f32>(row, index)?.map(|v| json!(v)),
        Type::FLOAT8 => cell::<f64>(row, index)?.map(|v| json!(v)),
        Type::NUMERIC => cell::<Decimal>(row, index)?.map(|v| Value::String(v.to_string())),
        Type::JSON | Type::JSONB => cell::<Value>(row, index)?,
        Type::UUID => cell::<uuid::Uuid>(row, index)?.map(|v| Value::String(v.to_string())),
        Type::TIMESTAMP => cell::<NaiveDateTime>(row, index)?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => {
            cell::<DateTime<Utc>>(row, index)?.map(|v| Value::String(v.to_rfc3339()))
        }
        Type::DATE => cell::<NaiveDate>(row, index)?.map(|v| Value::String(v.to_string())),
        Type::TIME => cell::<NaiveTime>(row, index)?.map(|v| Value::String(v.to_string())),
        Type::BYTEA => cell::<Vec<u8>>(row, index)?
            .map(|v| Value::String(base64::engine::general_purpose::STANDARD.encode(v))),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            cell::<Vec<Option<String>>>(row, index)?.map(|v| json!(v))
        }
        Type::INT4_ARRAY => cell::<Vec<Option<i32>>>(row, index)?.map(|v| json!(v)),
        Type::INT8_ARRAY => cell::<Vec<Option<i64>>>(row, index)?.map(|v| json!(v)),
        _ => cell::<String>(row, index)?.map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Decode every column of `row`, keyed by column name.
pub fn decode_row(row: &may_postgres::Row) -> Result<Row> {
    let mut decoded = Row::with_capacity(row.columns().len());
    for (index, column) in row.columns().iter().enumerate() {
        decoded.insert(column.name().to_string(), decode_cell(row, index)?);
    }
    Ok(decoded)
}

pub fn decode_rows(rows: &[may_postgres::Row]) -> Result<Vec<Row>> {
    rows.iter().map(decode_row).collect()
}

/// First column of the first row as a count.
pub fn decode_count(rows: &[may_postgres::Row]) -> Result<u64> {
    let Some(row) = rows.first() else {
        return Ok(0);
    };
    let count = cell::<i64>(row, 0)?.unwrap_or(0);
    Ok(u64::try_from(count).unwrap_or(0))
}
