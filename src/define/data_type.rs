//! Column data types and their mapping onto `SeaQuery` column definitions.
//!
//! Type names are accepted in the spelling a configuration file would use (`"bigint"`,
//! `"varchar"`) as well as the spelling `information_schema.columns.data_type` reports
//! (`"character varying"`, `"timestamp without time zone"`), so a declared column and its
//! live counterpart compare equal when they describe the same storage type.

use sea_query::ColumnDef;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Decimal,
    Text,
    Varchar,
    Char,
    Boolean,
    Json,
    Jsonb,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Uuid,
    Binary,
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Text
    }
}

impl DataType {
    /// Parse a type name. Unknown names fall back to `Text`.
    pub fn parse(name: &str) -> DataType {
        let lower = name.trim().to_lowercase();
        match lower.as_str() {
            "smallint" | "int2" | "i16" | "smallserial" => DataType::SmallInt,
            "integer" | "int" | "int4" | "i32" | "serial" => DataType::Integer,
            "bigint" | "int8" | "i64" | "big_integer" | "bigserial" => DataType::BigInt,
            "real" | "float" | "float4" | "f32" => DataType::Real,
            "double" | "double precision" | "double_precision" | "float8" | "f64" => {
                DataType::Double
            }
            "decimal" | "numeric" => DataType::Decimal,
            "varchar" | "character varying" | "string" => DataType::Varchar,
            "char" | "character" | "bpchar" => DataType::Char,
            "boolean" | "bool" => DataType::Boolean,
            "json" => DataType::Json,
            "jsonb" => DataType::Jsonb,
            "timestamp" | "datetime" | "timestamp without time zone" => DataType::Timestamp,
            "timestamptz" | "timestamp with time zone" => DataType::TimestampTz,
            "date" => DataType::Date,
            "time" | "time without time zone" | "timetz" | "time with time zone" => {
                DataType::Time
            }
            "uuid" => DataType::Uuid,
            "binary" | "bytes" | "bytea" | "blob" => DataType::Binary,
            _ => DataType::Text,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::SmallInt => "smallint",
            DataType::Integer => "integer",
            DataType::BigInt => "bigint",
            DataType::Real => "real",
            DataType::Double => "double precision",
            DataType::Decimal => "numeric",
            DataType::Text => "text",
            DataType::Varchar => "character varying",
            DataType::Char => "character",
            DataType::Boolean => "boolean",
            DataType::Json => "json",
            DataType::Jsonb => "jsonb",
            DataType::Timestamp => "timestamp without time zone",
            DataType::TimestampTz => "timestamp with time zone",
            DataType::Date => "date",
            DataType::Time => "time without time zone",
            DataType::Uuid => "uuid",
            DataType::Binary => "bytea",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DataType::SmallInt | DataType::Integer | DataType::BigInt)
    }

    /// Configure a `ColumnDef` with this type.
    ///
    /// `length` applies to `Varchar`/`Char`; `precision`/`scale` apply to `Decimal` and default
    /// to `(10, 2)` when absent.
    pub(crate) fn apply(
        self,
        def: &mut ColumnDef,
        length: Option<u32>,
        precision: Option<u32>,
        scale: Option<u32>,
    ) {
        match self {
            DataType::SmallInt => {
                def.small_integer();
            }
            DataType::Integer => {
                def.integer();
            }
            DataType::BigInt => {
                def.big_integer();
            }
            DataType::Real => {
                def.float();
            }
            DataType::Double => {
                def.double();
            }
            DataType::Decimal => {
                def.decimal_len(precision.unwrap_or(10), scale.unwrap_or(2));
            }
            DataType::Text => {
                def.text();
            }
            DataType::Varchar => match length {
                Some(len) => {
                    def.string_len(len);
                }
                None => {
                    def.string();
                }
            },
            DataType::Char => match length {
                Some(len) => {
                    def.char_len(len);
                }
                None => {
                    def.char();
                }
            },
            DataType::Boolean => {
                def.boolean();
            }
            DataType::Json => {
                def.json();
            }
            DataType::Jsonb => {
                def.json_binary();
            }
            DataType::Timestamp => {
                def.timestamp();
            }
            DataType::TimestampTz => {
                def.timestamp_with_time_zone();
            }
            DataType::Date => {
                def.date();
            }
            DataType::Time => {
                def.time();
            }
            DataType::Uuid => {
                def.uuid();
            }
            DataType::Binary => {
                def.binary();
            }
        }
    }
}

impl From<String> for DataType {
    fn from(value: String) -> Self {
        DataType::parse(&value)
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_and_catalog_spellings_agree() {
        assert_eq!(DataType::parse("varchar"), DataType::parse("character varying"));
        assert_eq!(DataType::parse("BIGINT"), DataType::parse("int8"));
        assert_eq!(
            DataType::parse("timestamp"),
            DataType::parse("timestamp without time zone")
        );
        assert_eq!(DataType::parse("float8"), DataType::Double);
    }

    #[test]
    fn test_unknown_type_defaults_to_text() {
        assert_eq!(DataType::parse("tsvector"), DataType::Text);
    }

    #[test]
    fn test_round_trips_through_catalog_name() {
        for ty in [DataType::Integer, DataType::Varchar, DataType::TimestampTz, DataType::Jsonb] {
            assert_eq!(DataType::parse(ty.as_str()), ty);
        }
    }
}
