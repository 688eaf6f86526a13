//! Driver-to-canonical value mapping
//!
//! Maps driver-native column types onto the gateway's canonical type tags
//! and decodes each cell into JSON. Unknown types degrade to a stringified
//! best-effort value rather than failing the row.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use nlq_core::types::{ColumnMeta, TypeTag};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};
use uuid::Uuid;

/// Canonical tag for a PostgreSQL type name as reported by the driver.
pub fn pg_type_tag(type_name: &str) -> TypeTag {
    match type_name {
        "INT2" | "INT4" | "INT8" | "OID" => TypeTag::Int,
        "FLOAT4" | "FLOAT8" | "NUMERIC" => TypeTag::Float,
        "BOOL" => TypeTag::Bool,
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "UUID" | "TIME" | "INTERVAL" => {
            TypeTag::Text
        }
        "BYTEA" => TypeTag::Bytes,
        "TIMESTAMP" | "TIMESTAMPTZ" => TypeTag::Timestamp,
        "DATE" => TypeTag::Date,
        "JSON" | "JSONB" => TypeTag::Json,
        "VOID" => TypeTag::Null,
        _ => TypeTag::Unknown,
    }
}

/// Canonical tag for a MySQL type name as reported by the driver.
pub fn mysql_type_tag(type_name: &str) -> TypeTag {
    match type_name {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR"
        | "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => TypeTag::Int,
        "FLOAT" | "DOUBLE" | "DECIMAL" => TypeTag::Float,
        "BOOLEAN" => TypeTag::Bool,
        "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET"
        | "TIME" => TypeTag::Text,
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "VARBINARY" | "BINARY" => TypeTag::Bytes,
        "DATETIME" | "TIMESTAMP" => TypeTag::Timestamp,
        "DATE" => TypeTag::Date,
        "JSON" => TypeTag::Json,
        _ => TypeTag::Unknown,
    }
}

/// Column metadata for a Postgres result row.
pub fn pg_columns(row: &PgRow) -> Vec<ColumnMeta> {
    row.columns()
        .iter()
        .map(|col| ColumnMeta {
            name: col.name().to_string(),
            type_tag: pg_type_tag(col.type_info().name()),
        })
        .collect()
}

/// Column metadata for a MySQL result row.
pub fn mysql_columns(row: &MySqlRow) -> Vec<ColumnMeta> {
    row.columns()
        .iter()
        .map(|col| ColumnMeta {
            name: col.name().to_string(),
            type_tag: mysql_type_tag(col.type_info().name()),
        })
        .collect()
}

/// Decode one Postgres row into JSON cells.
pub fn pg_row_values(row: &PgRow) -> Vec<Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_cell(row, i, col.type_info().name()))
        .collect()
}

fn pg_cell(row: &PgRow, i: usize, type_name: &str) -> Value {
    match type_name {
        "INT2" => opt_num(row.try_get::<Option<i16>, _>(i).ok().flatten()),
        "INT4" | "OID" => opt_num(row.try_get::<Option<i32>, _>(i).ok().flatten()),
        "INT8" => opt_num(row.try_get::<Option<i64>, _>(i).ok().flatten()),
        "FLOAT4" => float_value(row.try_get::<Option<f32>, _>(i).ok().flatten().map(f64::from)),
        "FLOAT8" => float_value(row.try_get::<Option<f64>, _>(i).ok().flatten()),
        "NUMERIC" => float_value(
            row.try_get::<Option<Decimal>, _>(i)
                .ok()
                .flatten()
                .and_then(|d| d.to_f64()),
        ),
        "BOOL" => row
            .try_get::<Option<bool>, _>(i)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => text(row.try_get::<Option<String>, _>(i)),
        "UUID" => row
            .try_get::<Option<Uuid>, _>(i)
            .ok()
            .flatten()
            .map(|u| Value::String(u.to_string()))
            .unwrap_or(Value::Null),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(i)
            .ok()
            .flatten()
            .map(|b| Value::String(hex_encode(&b)))
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(i)
            .ok()
            .flatten()
            .map(|t| Value::String(t.to_rfc3339()))
            .unwrap_or(Value::Null),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(i)
            .ok()
            .flatten()
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(i)
            .ok()
            .flatten()
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(i)
            .ok()
            .flatten()
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(i)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        _ => text(row.try_get::<Option<String>, _>(i)),
    }
}

/// Decode one MySQL row into JSON cells.
pub fn mysql_row_values(row: &MySqlRow) -> Vec<Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| mysql_cell(row, i, col.type_info().name()))
        .collect()
}

fn mysql_cell(row: &MySqlRow, i: usize, type_name: &str) -> Value {
    match type_name {
        "TINYINT" => opt_num(row.try_get::<Option<i8>, _>(i).ok().flatten()),
        "SMALLINT" => opt_num(row.try_get::<Option<i16>, _>(i).ok().flatten()),
        "MEDIUMINT" | "INT" => opt_num(row.try_get::<Option<i32>, _>(i).ok().flatten()),
        "BIGINT" => opt_num(row.try_get::<Option<i64>, _>(i).ok().flatten()),
        "TINYINT UNSIGNED" => opt_num(row.try_get::<Option<u8>, _>(i).ok().flatten()),
        "SMALLINT UNSIGNED" => opt_num(row.try_get::<Option<u16>, _>(i).ok().flatten()),
        "MEDIUMINT UNSIGNED" | "INT UNSIGNED" => {
            opt_num(row.try_get::<Option<u32>, _>(i).ok().flatten())
        }
        "BIGINT UNSIGNED" => opt_num(row.try_get::<Option<u64>, _>(i).ok().flatten()),
        "YEAR" => opt_num(row.try_get::<Option<u16>, _>(i).ok().flatten()),
        "FLOAT" => float_value(row.try_get::<Option<f32>, _>(i).ok().flatten().map(f64::from)),
        "DOUBLE" => float_value(row.try_get::<Option<f64>, _>(i).ok().flatten()),
        "DECIMAL" => float_value(
            row.try_get::<Option<Decimal>, _>(i)
                .ok()
                .flatten()
                .and_then(|d| d.to_f64()),
        ),
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(i)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
            text(row.try_get::<Option<String>, _>(i))
        }
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "VARBINARY" | "BINARY" => row
            .try_get::<Option<Vec<u8>>, _>(i)
            .ok()
            .flatten()
            .map(|b| Value::String(hex_encode(&b)))
            .unwrap_or(Value::Null),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(i)
            .ok()
            .flatten()
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(i)
            .ok()
            .flatten()
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(i)
            .ok()
            .flatten()
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        "JSON" => row
            .try_get::<Option<Value>, _>(i)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        _ => text(row.try_get::<Option<String>, _>(i)),
    }
}

fn opt_num<N: Into<serde_json::Number>>(value: Option<N>) -> Value {
    value.map(|n| Value::Number(n.into())).unwrap_or(Value::Null)
}

fn float_value(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn text(value: std::result::Result<Option<String>, sqlx::Error>) -> Value {
    value
        .ok()
        .flatten()
        .map(Value::String)
        .unwrap_or(Value::Null)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
