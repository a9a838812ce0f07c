//! Value conversion between row values, `SeaQuery` values and `may_postgres` parameters.
//!
//! Row values arrive as `serde_json::Value`, so a number carries no column width and a
//! timestamp is just a string. [`BindValue`] closes that gap: it looks at the parameter type
//! the server inferred for each placeholder and encodes the value in that type (narrowing
//! integers, parsing uuid/timestamp/numeric strings, serialising JSON).

use crate::error::{BridgeError, ErrorCode, Result};
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use may_postgres::types::{IsNull, ToSql, Type};
use postgres_types::to_sql_checked;
use rust_decimal::Decimal;
use sea_query::Value;
use serde_json::Value as JsonValue;
use std::error::Error;
use std::str::FromStr;

type BindResult = std::result::Result<IsNull, Box<dyn Error + Sync + Send>>;

/// Convert a row value into a `SeaQuery` value.
pub fn json_to_value(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::String(None),
        JsonValue::Bool(b) => Value::Bool(Some(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::BigInt(Some(i))
            } else if let Some(u) = n.as_u64() {
                Value::BigUnsigned(Some(u))
            } else {
                Value::Double(n.as_f64())
            }
        }
        JsonValue::String(s) => Value::String(Some(s.clone())),
        other => Value::Json(Some(Box::new(other.clone()))),
    }
}

/// A `SeaQuery` value encoded according to the placeholder's inferred type.
#[derive(Debug)]
pub struct BindValue<'a>(pub &'a Value);

impl ToSql for BindValue<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> BindResult {
        match self.0 {
            Value::Bool(Some(b)) => bind_bool(*b, ty, out),
            Value::TinyInt(Some(i)) => bind_i64(i64::from(*i), ty, out),
            Value::SmallInt(Some(i)) => bind_i64(i64::from(*i), ty, out),
            Value::Int(Some(i)) => bind_i64(i64::from(*i), ty, out),
            Value::BigInt(Some(i)) => bind_i64(*i, ty, out),
            Value::TinyUnsigned(Some(u)) => bind_i64(i64::from(*u), ty, out),
            Value::SmallUnsigned(Some(u)) => bind_i64(i64::from(*u), ty, out),
            Value::Unsigned(Some(u)) => bind_i64(i64::from(*u), ty, out),
            Value::BigUnsigned(Some(u)) => bind_i64(i64::try_from(*u)?, ty, out),
            Value::Float(Some(f)) => bind_f64(f64::from(*f), ty, out),
            Value::Double(Some(d)) => bind_f64(*d, ty, out),
            Value::String(Some(s)) => bind_text(s, ty, out),
            Value::Char(Some(c)) => bind_text(&c.to_string(), ty, out),
            Value::Bytes(Some(b)) => b.to_sql(ty, out),
            Value::Json(Some(j)) => bind_json(j, ty, out),
            Value::Bool(None)
            | Value::TinyInt(None)
            | Value::SmallInt(None)
            | Value::Int(None)
            | Value::BigInt(None)
            | Value::TinyUnsigned(None)
            | Value::SmallUnsigned(None)
            | Value::Unsigned(None)
            | Value::BigUnsigned(None)
            | Value::Float(None)
            | Value::Double(None)
            | Value::String(None)
            | Value::Char(None)
            | Value::Bytes(None)
            | Value::Json(None) => Ok(IsNull::Yes),
            other => Err(format!("unsupported parameter value {other:?}").into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn is_text(ty: &Type) -> bool {
    *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
}

fn is_json(ty: &Type) -> bool {
    *ty == Type::JSON || *ty == Type::JSONB
}

fn bind_i64(v: i64, ty: &Type, out: &mut BytesMut) -> BindResult {
    if *ty == Type::INT8 {
        v.to_sql(ty, out)
    } else if *ty == Type::INT4 {
        i32::try_from(v)?.to_sql(ty, out)
    } else if *ty == Type::INT2 {
        i16::try_from(v)?.to_sql(ty, out)
    } else if *ty == Type::FLOAT8 {
        (v as f64).to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        (v as f32).to_sql(ty, out)
    } else if *ty == Type::NUMERIC {
        Decimal::from(v).to_sql(ty, out)
    } else if *ty == Type::BOOL {
        (v != 0).to_sql(ty, out)
    } else if is_json(ty) {
        JsonValue::from(v).to_sql(ty, out)
    } else if is_text(ty) {
        v.to_string().to_sql(ty, out)
    } else {
        Err(format!("cannot bind integer {v} to a {ty} parameter").into())
    }
}

fn bind_f64(v: f64, ty: &Type, out: &mut BytesMut) -> BindResult {
    if *ty == Type::FLOAT8 {
        v.to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        (v as f32).to_sql(ty, out)
    } else if *ty == Type::NUMERIC {
        Decimal::try_from(v)?.to_sql(ty, out)
    } else if *ty == Type::INT2 || *ty == Type::INT4 || *ty == Type::INT8 {
        if v.fract() != 0.0 {
            return Err(format!("cannot bind {v} to an integer parameter").into());
        }
        bind_i64(v as i64, ty, out)
    } else if is_json(ty) {
        JsonValue::from(v).to_sql(ty, out)
    } else if is_text(ty) {
        v.to_string().to_sql(ty, out)
    } else {
        Err(format!("cannot bind float {v} to a {ty} parameter").into())
    }
}

fn bind_bool(v: bool, ty: &Type, out: &mut BytesMut) -> BindResult {
    if *ty == Type::BOOL {
        v.to_sql(ty, out)
    } else if is_json(ty) {
        JsonValue::Bool(v).to_sql(ty, out)
    } else if is_text(ty) {
        v.to_string().to_sql(ty, out)
    } else {
        bind_i64(i64::from(v), ty, out)
    }
}

fn parse_timestamp(s: &str) -> std::result::Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
}

fn bind_text(s: &str, ty: &Type, out: &mut BytesMut) -> BindResult {
    if is_text(ty) {
        s.to_sql(ty, out)
    } else if *ty == Type::UUID {
        uuid::Uuid::parse_str(s.trim())?.to_sql(ty, out)
    } else if *ty == Type::TIMESTAMP {
        parse_timestamp(s.trim())?.to_sql(ty, out)
    } else if *ty == Type::TIMESTAMPTZ {
        DateTime::parse_from_rfc3339(s.trim())?
            .with_timezone(&Utc)
            .to_sql(ty, out)
    } else if *ty == Type::DATE {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")?.to_sql(ty, out)
    } else if *ty == Type::TIME {
        NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")?.to_sql(ty, out)
    } else if *ty == Type::NUMERIC {
        Decimal::from_str(s.trim())?.to_sql(ty, out)
    } else if *ty == Type::INT2 || *ty == Type::INT4 || *ty == Type::INT8 {
        bind_i64(s.trim().parse::<i64>()?, ty, out)
    } else if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 {
        bind_f64(s.trim().parse::<f64>()?, ty, out)
    } else if *ty == Type::BOOL {
        s.trim().parse::<bool>()?.to_sql(ty, out)
    } else if is_json(ty) {
        JsonValue::String(s.to_string()).to_sql(ty, out)
    } else {
        s.to_sql(ty, out)
    }
}

fn bind_json(j: &JsonValue, ty: &Type, out: &mut BytesMut) -> BindResult {
    if is_json(ty) {
        return j.to_sql(ty, out);
    }
    match j {
        JsonValue::Null => Ok(IsNull::Yes),
        JsonValue::Bool(b) => bind_bool(*b, ty, out),
        JsonValue::String(s) => bind_text(s, ty, out),
        JsonValue::Number(_) => BindValue(&json_to_value(j)).to_sql(ty, out),
        other => bind_text(&other.to_string(), ty, out),
    }
}

/// Run `f` with `values` bound as `may_postgres` parameters.
///
/// # Errors
///
/// Returns an `InvalidValue` usage error if `values` holds a `BigUnsigned` larger than
/// `i64::MAX`, otherwise whatever `f` returns.
pub fn with_converted_params<F, R>(values: &[Value], f: F) -> Result<R>
where
    F: FnOnce(&[&dyn ToSql]) -> Result<R>,
{
    for value in values {
        if let Value::BigUnsigned(Some(u)) = value {
            if *u > i64::MAX as u64 {
                return Err(BridgeError::usage(
                    ErrorCode::InvalidValue,
                    &[&"parameter", &format!("{u} exceeds i64::MAX")],
                ));
            }
        }
    }

    let binds: Vec<BindValue<'_>> = values.iter().map(BindValue).collect();
    let params: Vec<&dyn ToSql> = binds.iter().map(|b| b as &dyn ToSql).collect();
    f(&params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(value: &Value, ty: &Type) -> std::result::Result<(IsNull, BytesMut), String> {
        let mut out = BytesMut::new();
        BindValue(value)
            .to_sql(ty, &mut out)
            .map(|is_null| (is_null, out))
            .map_err(|e| e.to_string())
    }

    #[test]
    fn test_json_to_value() {
        assert_eq!(json_to_value(&json!(null)), Value::String(None));
        assert_eq!(json_to_value(&json!(7)), Value::BigInt(Some(7)));
        assert_eq!(json_to_value(&json!(1.5)), Value::Double(Some(1.5)));
        assert_eq!(json_to_value(&json!("x")), Value::String(Some("x".to_string())));
        assert_eq!(
            json_to_value(&json!({"a": 1})),
            Value::Json(Some(Box::new(json!({"a": 1}))))
        );
    }

    #[test]
    fn test_integer_narrows_to_int4() {
        let (is_null, out) = encode(&Value::BigInt(Some(42)), &Type::INT4).unwrap();
        assert!(matches!(is_null, IsNull::No));
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_integer_overflow_is_rejected() {
        assert!(encode(&Value::BigInt(Some(i64::MAX)), &Type::INT2).is_err());
    }

    #[test]
    fn test_null_is_null_for_any_type() {
        let (is_null, out) = encode(&Value::String(None), &Type::UUID).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
        assert!(out.is_empty());
    }

    #[test]
    fn test_string_parses_uuid() {
        let id = uuid::Uuid::new_v4().to_string();
        let (_, out) = encode(&Value::String(Some(id)), &Type::UUID).unwrap();
        assert_eq!(out.len(), 16);
        assert!(encode(&Value::String(Some("nope".to_string())), &Type::UUID).is_err());
    }

    #[test]
    fn test_string_parses_timestamp() {
        let value = Value::String(Some("2024-05-01 10:30:00".to_string()));
        let (_, out) = encode(&value, &Type::TIMESTAMP).unwrap();
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn test_with_converted_params_keeps_order() {
        let values = vec![Value::BigInt(Some(1)), Value::String(Some("a".to_string()))];
        let count = with_converted_params(&values, |params| Ok(params.len())).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_with_converted_params_rejects_huge_unsigned() {
        let values = vec![Value::BigUnsigned(Some(u64::MAX))];
        assert!(with_converted_params(&values, |_| Ok(())).is_err());
    }
}
