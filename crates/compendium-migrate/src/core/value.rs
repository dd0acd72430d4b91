//! Attribute values and their SQLite encoding.
//!
//! Entity attributes vary per category, so rows are carried as an
//! order-preserving map of column name to loosely typed JSON value. The
//! declared [`ColumnType`] of each column decides how a value is bound on
//! write and decoded on read.

use crate::core::schema::ColumnType;
use crate::error::{MigrateError, Result};
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::Row;

/// Attribute values of one entity row, keyed by column name, in column order.
pub type Attributes = serde_json::Map<String, Value>;

/// Opaque structured-facts payload stored verbatim per entity.
pub type Facts = serde_json::Map<String, Value>;

/// An unprepared SQLite statement with its bound arguments.
pub type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Bind `value` to the next placeholder of `query`, converted for `ty`.
pub fn bind_value<'q>(
    query: SqliteQuery<'q>,
    column: &str,
    value: &Value,
    ty: ColumnType,
) -> Result<SqliteQuery<'q>> {
    if value.is_null() {
        return Ok(query.bind(None::<String>));
    }

    let mismatch = || {
        MigrateError::Schema(format!(
            "column '{}' expects {:?}, got {}",
            column, ty, value
        ))
    };

    let bound = match ty {
        ColumnType::Text => match value {
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        },
        ColumnType::Integer => {
            let v = match value {
                Value::Bool(b) => i64::from(*b),
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .ok_or_else(mismatch)?,
                Value::String(s) => s.trim().parse::<i64>().map_err(|_| mismatch())?,
                _ => return Err(mismatch()),
            };
            query.bind(v)
        }
        ColumnType::Real => {
            let v = match value {
                Value::Number(n) => n.as_f64().ok_or_else(mismatch)?,
                Value::String(s) => s.trim().parse::<f64>().map_err(|_| mismatch())?,
                _ => return Err(mismatch()),
            };
            query.bind(v)
        }
        ColumnType::Boolean => {
            let v = match value {
                Value::Bool(b) => *b,
                Value::Number(n) if n.as_i64() == Some(0) => false,
                Value::Number(n) if n.as_i64() == Some(1) => true,
                _ => return Err(mismatch()),
            };
            query.bind(v)
        }
        ColumnType::Json => query.bind(value.to_string()),
    };

    Ok(bound)
}

/// Decode column `column` of `row` according to its declared type.
///
/// SQLite is dynamically typed and merge-view columns carry no declared
/// type, so values are read unchecked and interpreted by `ty`. Stored JSON
/// that fails to parse is returned as a plain string rather than dropped.
pub fn decode_column(row: &SqliteRow, column: &str, ty: ColumnType) -> Result<Value> {
    let value = match ty {
        ColumnType::Text => row
            .try_get_unchecked::<Option<String>, _>(column)?
            .map(Value::String),
        ColumnType::Integer => row
            .try_get_unchecked::<Option<i64>, _>(column)?
            .map(Value::from),
        ColumnType::Real => row
            .try_get_unchecked::<Option<f64>, _>(column)?
            .map(Value::from),
        ColumnType::Boolean => row
            .try_get_unchecked::<Option<bool>, _>(column)?
            .map(Value::Bool),
        ColumnType::Json => row
            .try_get_unchecked::<Option<String>, _>(column)?
            .map(|raw| serde_json::from_str(&raw).unwrap_or(Value::String(raw))),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Look up a nested value in a facts payload by key path.
pub fn facts_lookup<'a>(facts: &'a Facts, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = facts.get(*first)?;
    for key in rest {
        current = current.as_object()?.get(*key)?;
    }
    Some(current)
}

/// Extract an integer sub-field; absent or non-integer fields yield `None`.
pub fn facts_i64(facts: &Facts, path: &[&str]) -> Option<i64> {
    facts_lookup(facts, path).and_then(Value::as_i64)
}

/// Extract a sub-field as text; numbers are rendered, objects yield `None`.
pub fn facts_text(facts: &Facts, path: &[&str]) -> Option<String> {
    match facts_lookup(facts, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
