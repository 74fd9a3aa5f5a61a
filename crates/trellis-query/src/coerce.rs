//! Value coercion: raw JSON scalars and arrays into typed SQL values.
//!
//! The target type comes from an explicit `cast_type`, the cached column
//! type, or, when neither is available, the shape of the value itself.

use crate::error::{QueryError, Result};
use crate::types::{SqlType, SqlValue};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Map a request `cast_type` string to its canonical SQL type
pub fn cast_target(cast_type: &str) -> Result<SqlType> {
    match cast_type.to_uppercase().as_str() {
        "STRING" | "VARCHAR" | "TEXT" => Ok(SqlType::Varchar),
        "CHAR" => Ok(SqlType::Char),
        "INTEGER" | "INT" => Ok(SqlType::Integer),
        "BIGINT" | "LONG" => Ok(SqlType::Bigint),
        "DECIMAL" | "NUMERIC" | "DOUBLE" => Ok(SqlType::Decimal),
        "BOOLEAN" => Ok(SqlType::Boolean),
        "DATE" => Ok(SqlType::Date),
        "TIME" => Ok(SqlType::Time),
        "DATETIME" | "TIMESTAMP" => Ok(SqlType::DateTime),
        "UUID" => Ok(SqlType::Uuid),
        "JSON" => Ok(SqlType::Json),
        "JSONB" => Ok(SqlType::Jsonb),
        other => Err(QueryError::InvalidArgument(format!(
            "Unsupported cast type: {}",
            other
        ))),
    }
}

/// Coerce one raw JSON value into the target type.
///
/// `format` overrides the default date/time parse patterns.
pub fn coerce(raw: &Value, target: SqlType, format: Option<&str>) -> Result<SqlValue> {
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }

    let fail = |raw: &Value, target: SqlType| {
        QueryError::InvalidArgument(format!(
            "Failed to parse value '{}' as {}",
            literal(raw),
            target
        ))
    };

    match target {
        SqlType::Varchar | SqlType::Char => match raw {
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Number(n) => Ok(SqlValue::Text(n.to_string())),
            Value::Bool(b) => Ok(SqlValue::Text(b.to_string())),
            _ => Err(fail(raw, target)),
        },
        SqlType::Integer => match raw {
            Value::Number(n) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(SqlValue::Integer)
                .ok_or_else(|| fail(raw, target)),
            Value::String(s) => s
                .parse::<i32>()
                .map(SqlValue::Integer)
                .map_err(|_| fail(raw, target)),
            _ => Err(fail(raw, target)),
        },
        SqlType::Bigint => match raw {
            Value::Number(n) => n.as_i64().map(SqlValue::Bigint).ok_or_else(|| fail(raw, target)),
            Value::String(s) => s
                .parse::<i64>()
                .map(SqlValue::Bigint)
                .map_err(|_| fail(raw, target)),
            _ => Err(fail(raw, target)),
        },
        SqlType::Decimal => match raw {
            Value::Number(n) => Decimal::from_str(&n.to_string())
                .map(SqlValue::Decimal)
                .map_err(|_| fail(raw, target)),
            Value::String(s) => Decimal::from_str(s)
                .map(SqlValue::Decimal)
                .map_err(|_| fail(raw, target)),
            _ => Err(fail(raw, target)),
        },
        SqlType::Boolean => match raw {
            Value::Bool(b) => Ok(SqlValue::Boolean(*b)),
            // Only the lowercase literals are accepted
            Value::String(s) if s == "true" => Ok(SqlValue::Boolean(true)),
            Value::String(s) if s == "false" => Ok(SqlValue::Boolean(false)),
            _ => Err(fail(raw, target)),
        },
        SqlType::Date => {
            let s = raw.as_str().ok_or_else(|| fail(raw, target))?;
            NaiveDate::parse_from_str(s, format.unwrap_or(DATE_FORMAT))
                .map(SqlValue::Date)
                .map_err(|_| fail(raw, target))
        }
        SqlType::Time => {
            let s = raw.as_str().ok_or_else(|| fail(raw, target))?;
            NaiveTime::parse_from_str(s, format.unwrap_or(TIME_FORMAT))
                .map(SqlValue::Time)
                .map_err(|_| fail(raw, target))
        }
        SqlType::DateTime => {
            let s = raw.as_str().ok_or_else(|| fail(raw, target))?;
            NaiveDateTime::parse_from_str(s, format.unwrap_or(DATETIME_FORMAT))
                .map(SqlValue::DateTime)
                .map_err(|_| fail(raw, target))
        }
        SqlType::Uuid => {
            let s = raw.as_str().ok_or_else(|| fail(raw, target))?;
            Uuid::parse_str(s)
                .map(SqlValue::Uuid)
                .map_err(|_| fail(raw, target))
        }
        SqlType::Json | SqlType::Jsonb => match raw {
            // Raw string kept as-is, not reparsed at bind time
            Value::String(s) => Ok(SqlValue::Json(s.clone())),
            other => Ok(SqlValue::Json(other.to_string())),
        },
        SqlType::Other => Ok(guess(raw)),
    }
}

/// Coerce element-wise; a scalar is promoted to a one-element list
pub fn coerce_list(raw: &Value, target: SqlType, format: Option<&str>) -> Result<Vec<SqlValue>> {
    match raw {
        Value::Array(items) => items.iter().map(|v| coerce(v, target, format)).collect(),
        scalar => Ok(vec![coerce(scalar, target, format)?]),
    }
}

/// Infer a bind type from the value's own shape.
///
/// Used when a column is absent from the schema map (qualified join columns)
/// and no cast is supplied. String probing order: boolean literal, integer,
/// decimal, date, time, datetime, UUID, JSON document, plain text.
pub fn guess(raw: &Value) -> SqlValue {
    match raw {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Bigint(i)
            } else {
                Decimal::from_str(&n.to_string())
                    .map(SqlValue::Decimal)
                    .unwrap_or_else(|_| SqlValue::Text(n.to_string()))
            }
        }
        Value::String(s) => guess_from_str(s),
        other => SqlValue::Json(other.to_string()),
    }
}

fn guess_from_str(s: &str) -> SqlValue {
    if s.eq_ignore_ascii_case("true") {
        return SqlValue::Boolean(true);
    }
    if s.eq_ignore_ascii_case("false") {
        return SqlValue::Boolean(false);
    }
    if let Ok(i) = s.parse::<i64>() {
        return SqlValue::Bigint(i);
    }
    if let Ok(d) = Decimal::from_str(s) {
        return SqlValue::Decimal(d);
    }
    if looks_like_date(s) {
        if let Ok(d) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
            return SqlValue::Date(d);
        }
    }
    if looks_like_time(s) {
        if let Ok(t) = NaiveTime::parse_from_str(s, TIME_FORMAT) {
            return SqlValue::Time(t);
        }
    }
    if looks_like_datetime(s) {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, DATETIME_FORMAT) {
            return SqlValue::DateTime(dt);
        }
    }
    if let Ok(u) = Uuid::parse_str(s) {
        return SqlValue::Uuid(u);
    }
    if (s.starts_with('{') || s.starts_with('['))
        && serde_json::from_str::<Value>(s).is_ok()
    {
        return SqlValue::Json(s.to_string());
    }
    SqlValue::Text(s.to_string())
}

fn looks_like_date(s: &str) -> bool {
    s.len() == 10 && s.as_bytes()[4] == b'-' && s.as_bytes()[7] == b'-'
}

fn looks_like_time(s: &str) -> bool {
    s.len() == 8 && s.as_bytes()[2] == b':' && s.as_bytes()[5] == b':'
}

fn looks_like_datetime(s: &str) -> bool {
    s.len() == 19
        && s.as_bytes()[4] == b'-'
        && s.as_bytes()[7] == b'-'
        && s.as_bytes()[10] == b'T'
}

/// Short form of the offending literal for error messages
fn literal(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_table_maps_aliases() {
        assert_eq!(cast_target("STRING").unwrap(), SqlType::Varchar);
        assert_eq!(cast_target("text").unwrap(), SqlType::Varchar);
        assert_eq!(cast_target("INT").unwrap(), SqlType::Integer);
        assert_eq!(cast_target("LONG").unwrap(), SqlType::Bigint);
        assert_eq!(cast_target("NUMERIC").unwrap(), SqlType::Decimal);
        assert_eq!(cast_target("TIMESTAMP").unwrap(), SqlType::DateTime);
        assert!(cast_target("BLOB").is_err());
    }

    #[test]
    fn coerces_string_to_integer() {
        let value = coerce(&serde_json::json!("50"), SqlType::Integer, None).unwrap();
        assert_eq!(value, SqlValue::Integer(50));
    }

    #[test]
    fn coerces_number_to_decimal_exactly() {
        let value = coerce(&serde_json::json!(123.45), SqlType::Decimal, None).unwrap();
        assert_eq!(value, SqlValue::Decimal(Decimal::from_str("123.45").unwrap()));
    }

    #[test]
    fn boolean_rejects_arbitrary_strings() {
        assert!(coerce(&serde_json::json!("yes"), SqlType::Boolean, None).is_err());
        assert!(coerce(&serde_json::json!("True"), SqlType::Boolean, None).is_err());
        assert_eq!(
            coerce(&serde_json::json!("true"), SqlType::Boolean, None).unwrap(),
            SqlValue::Boolean(true)
        );
    }

    #[test]
    fn datetime_uses_default_and_override_formats() {
        let value = coerce(
            &serde_json::json!("2024-03-01T10:15:00"),
            SqlType::DateTime,
            None,
        )
        .unwrap();
        assert_eq!(
            value,
            SqlValue::DateTime(
                NaiveDate::from_ymd_opt(2024, 3, 1)
                    .unwrap()
                    .and_hms_opt(10, 15, 0)
                    .unwrap()
            )
        );

        let value = coerce(
            &serde_json::json!("01/03/2024 10:15"),
            SqlType::DateTime,
            Some("%d/%m/%Y %H:%M"),
        )
        .unwrap();
        assert!(matches!(value, SqlValue::DateTime(_)));
    }

    #[test]
    fn parse_failure_cites_type_and_literal() {
        let err = coerce(&serde_json::json!("nope"), SqlType::Integer, None).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("nope"));
        assert!(msg.contains("integer"));
    }

    #[test]
    fn list_promotes_scalar() {
        let values = coerce_list(&serde_json::json!(7), SqlType::Bigint, None).unwrap();
        assert_eq!(values, vec![SqlValue::Bigint(7)]);

        let values = coerce_list(&serde_json::json!([1, 2, 3]), SqlType::Bigint, None).unwrap();
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn guesses_from_value_shape() {
        assert_eq!(guess(&serde_json::json!(500)), SqlValue::Bigint(500));
        assert_eq!(guess(&serde_json::json!(true)), SqlValue::Boolean(true));
        assert!(matches!(
            guess(&serde_json::json!("2024-03-01")),
            SqlValue::Date(_)
        ));
        assert!(matches!(
            guess(&serde_json::json!("10:15:00")),
            SqlValue::Time(_)
        ));
        assert!(matches!(
            guess(&serde_json::json!("2024-03-01T10:15:00")),
            SqlValue::DateTime(_)
        ));
        assert!(matches!(
            guess(&serde_json::json!("f47ac10b-58cc-4372-a567-0e02b2c3d479")),
            SqlValue::Uuid(_)
        ));
        assert!(matches!(
            guess(&serde_json::json!(r#"{"a": 1}"#)),
            SqlValue::Json(_)
        ));
        assert_eq!(
            guess(&serde_json::json!("plain")),
            SqlValue::Text("plain".into())
        );
    }

    #[test]
    fn json_value_is_kept_raw() {
        let value = coerce(&serde_json::json!(r#"{"k":"v"}"#), SqlType::Jsonb, None).unwrap();
        assert_eq!(value, SqlValue::Json(r#"{"k":"v"}"#.to_string()));
    }
}
