//! Predicate builder: one filter descriptor becomes a SQL condition
//! fragment with `?` placeholders; a filter list is combined
//! left-associatively using each filter's connective toward the next one.

use crate::coerce::{cast_target, coerce, coerce_list};
use crate::error::{QueryError, Result};
use crate::types::{
    FilterOperator, Search, SqlDialect, SqlType, SqlValue, TableSchema,
};
use chrono::{Duration, Timelike};
use serde_json::Value;

static NULL: Value = Value::Null;

/// A rendered SQL snippet plus its bind values, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Qualifiers a filter column may legally reference
#[derive(Debug, Clone)]
pub struct FilterScope<'a> {
    /// Alias of the base table (the table name itself when not aliased)
    pub effective_alias: &'a str,
    /// Aliases (or table names) introduced by joins, in join order
    pub join_aliases: Vec<&'a str>,
}

impl<'a> FilterScope<'a> {
    pub fn base_only(effective_alias: &'a str) -> Self {
        Self {
            effective_alias,
            join_aliases: Vec::new(),
        }
    }

    fn knows(&self, qualifier: &str) -> bool {
        qualifier == self.effective_alias || self.join_aliases.iter().any(|a| *a == qualifier)
    }
}

/// Combine a filter list into a single condition fragment.
///
/// Returns `None` for an empty list (no WHERE clause). The connective stored
/// on filter *k* joins it with filter *k+1*; the last filter's connective is
/// ignored.
pub fn build_condition(
    filters: &[Search],
    schema: &TableSchema,
    scope: &FilterScope,
    dialect: SqlDialect,
) -> Result<Option<SqlFragment>> {
    if filters.is_empty() {
        return Ok(None);
    }

    let mut combined = build_single(&filters[0], schema, scope, dialect)?;

    for (previous, filter) in filters.iter().zip(filters.iter().skip(1)) {
        let next = build_single(filter, schema, scope, dialect)?;
        let mut params = combined.params;
        params.extend(next.params);
        combined = SqlFragment {
            sql: format!(
                "({} {} {})",
                combined.sql,
                previous.logical_operator.sql(),
                next.sql
            ),
            params,
        };
    }

    Ok(Some(combined))
}

/// Build the condition fragment for one filter
fn build_single(
    search: &Search,
    schema: &TableSchema,
    scope: &FilterScope,
    dialect: SqlDialect,
) -> Result<SqlFragment> {
    let (field, column_type) = resolve_field(&search.column, schema, scope, dialect)?;

    let target = match &search.cast_type {
        Some(cast) => Some(cast_target(cast)?),
        None => column_type,
    };

    let field = match (&search.cast_type, target) {
        (Some(_), Some(t)) => format!("CAST({} AS {})", field, dialect.cast_type_name(t)),
        _ => field,
    };

    let target = target.unwrap_or(SqlType::Other);
    let format = search.cast_format.as_deref();
    let raw = search.value.as_ref().unwrap_or(&NULL);

    match search.filter_operator {
        FilterOperator::Equals | FilterOperator::NotEquals => {
            let negated = search.filter_operator == FilterOperator::NotEquals;

            if raw.is_null() {
                let op = if negated { "IS NOT NULL" } else { "IS NULL" };
                return Ok(SqlFragment {
                    sql: format!("{} {}", field, op),
                    params: Vec::new(),
                });
            }

            match coerce(raw, target, format)? {
                // Second-truncated request values match a one-second window,
                // accommodating sub-second storage precision
                SqlValue::DateTime(dt) => {
                    let lower = truncate_seconds(dt);
                    let upper = lower + Duration::seconds(1);
                    let op = if negated { "NOT BETWEEN" } else { "BETWEEN" };
                    Ok(SqlFragment {
                        sql: format!("{} {} ? AND ?", field, op),
                        params: vec![SqlValue::DateTime(lower), SqlValue::DateTime(upper)],
                    })
                }
                value => {
                    let op = if negated { "<>" } else { "=" };
                    Ok(SqlFragment {
                        sql: format!("{} {} ?", field, op),
                        params: vec![value],
                    })
                }
            }
        }
        FilterOperator::GreaterThan
        | FilterOperator::GreaterThanEqual
        | FilterOperator::LessThan
        | FilterOperator::LessThanEqual => {
            if raw.is_null() {
                return Err(QueryError::InvalidArgument(format!(
                    "Comparison on column '{}' requires a value",
                    search.column
                )));
            }

            let op = match search.filter_operator {
                FilterOperator::GreaterThan => ">",
                FilterOperator::GreaterThanEqual => ">=",
                FilterOperator::LessThan => "<",
                FilterOperator::LessThanEqual => "<=",
                _ => unreachable!(),
            };

            let value = match coerce(raw, target, format)? {
                SqlValue::DateTime(dt) => SqlValue::DateTime(truncate_seconds(dt)),
                value => value,
            };

            Ok(SqlFragment {
                sql: format!("{} {} ?", field, op),
                params: vec![value],
            })
        }
        FilterOperator::Like => {
            let needle = raw.as_str().ok_or_else(|| {
                QueryError::InvalidArgument(format!(
                    "LIKE on column '{}' requires a string value",
                    search.column
                ))
            })?;

            Ok(SqlFragment {
                sql: format!("{} LIKE ?", field),
                params: vec![SqlValue::Text(format!("%{}%", needle))],
            })
        }
        FilterOperator::In | FilterOperator::NotIn => {
            let values = coerce_list(raw, target, format)?;
            if values.is_empty() {
                return Err(QueryError::InvalidArgument(format!(
                    "IN on column '{}' requires a non-empty array",
                    search.column
                )));
            }

            let placeholders = vec!["?"; values.len()].join(", ");
            let op = if search.filter_operator == FilterOperator::NotIn {
                "NOT IN"
            } else {
                "IN"
            };

            Ok(SqlFragment {
                sql: format!("{} {} ({})", field, op, placeholders),
                params: values,
            })
        }
        FilterOperator::Between => {
            let values = coerce_list(raw, target, format)?;
            if values.len() != 2 {
                return Err(QueryError::InvalidArgument(
                    "BETWEEN needs exactly 2 values".to_string(),
                ));
            }

            let mut values = values;
            let upper = values.pop().unwrap();
            let lower = values.pop().unwrap();

            Ok(SqlFragment {
                sql: format!("{} BETWEEN ? AND ?", field),
                params: vec![lower, upper],
            })
        }
    }
}

/// Resolve a filter column to its rendered SQL field and, when known, the
/// cached column type.
///
/// Unqualified columns must exist in the base-table schema. Qualified
/// columns only need a qualifier that is the base alias or a join alias;
/// their type, when the qualifier is not the base table, is inferred from
/// the value at coercion time.
fn resolve_field(
    column: &str,
    schema: &TableSchema,
    scope: &FilterScope,
    dialect: SqlDialect,
) -> Result<(String, Option<SqlType>)> {
    if let Some((qualifier, name)) = column.split_once('.') {
        if qualifier.is_empty() || name.is_empty() || name.contains('.') {
            return Err(QueryError::InvalidArgument(format!(
                "Invalid field path: {} (expected format: alias.column)",
                column
            )));
        }
        if !scope.knows(qualifier) {
            return Err(QueryError::InvalidArgument(format!(
                "Unknown qualifier '{}' in column: {}",
                qualifier, column
            )));
        }

        let column_type = if qualifier == scope.effective_alias {
            schema.column(name).map(|c| c.sql_type)
        } else {
            None
        };

        Ok((
            format!("{}.{}", dialect.quote(qualifier), dialect.quote(name)),
            column_type,
        ))
    } else {
        let info = schema
            .column(column)
            .ok_or_else(|| QueryError::InvalidArgument(format!("Unknown column: {}", column)))?;

        Ok((dialect.quote(&info.name), Some(info.sql_type)))
    }
}

fn truncate_seconds(dt: chrono::NaiveDateTime) -> chrono::NaiveDateTime {
    dt.with_nanosecond(0).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnInfo, LogicalOperator};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn schema() -> TableSchema {
        TableSchema {
            table: "test_data_all_types".into(),
            columns: vec![
                ColumnInfo {
                    name: "varchar_col".into(),
                    sql_type: SqlType::Varchar,
                    type_name: "character varying".into(),
                },
                ColumnInfo {
                    name: "decimal_col".into(),
                    sql_type: SqlType::Decimal,
                    type_name: "numeric".into(),
                },
                ColumnInfo {
                    name: "string_int".into(),
                    sql_type: SqlType::Varchar,
                    type_name: "text".into(),
                },
                ColumnInfo {
                    name: "ts_col".into(),
                    sql_type: SqlType::DateTime,
                    type_name: "timestamp without time zone".into(),
                },
            ],
        }
    }

    fn search(column: &str, value: serde_json::Value, op: FilterOperator) -> Search {
        Search {
            column: column.into(),
            value: Some(value),
            filter_operator: op,
            ..Default::default()
        }
    }

    fn build(filters: &[Search]) -> Result<Option<SqlFragment>> {
        let schema = schema();
        let scope = FilterScope {
            effective_alias: "test_data_all_types",
            join_aliases: vec!["o"],
        };
        build_condition(filters, &schema, &scope, SqlDialect::Postgres)
    }

    #[test]
    fn empty_list_yields_no_condition() {
        assert_eq!(build(&[]).unwrap(), None);
    }

    #[test]
    fn like_binds_wrapped_pattern() {
        let fragment = build(&[search(
            "varchar_col",
            serde_json::json!("sam"),
            FilterOperator::Like,
        )])
        .unwrap()
        .unwrap();

        assert_eq!(fragment.sql, "\"varchar_col\" LIKE ?");
        assert_eq!(fragment.params, vec![SqlValue::Text("%sam%".into())]);
    }

    #[test]
    fn like_rejects_non_string() {
        let err = build(&[search(
            "varchar_col",
            serde_json::json!(42),
            FilterOperator::Like,
        )])
        .unwrap_err();
        assert!(err.to_string().contains("LIKE"));
    }

    #[test]
    fn between_on_decimal_binds_two_values() {
        let fragment = build(&[search(
            "decimal_col",
            serde_json::json!([0.0, 500.0]),
            FilterOperator::Between,
        )])
        .unwrap()
        .unwrap();

        assert_eq!(fragment.sql, "\"decimal_col\" BETWEEN ? AND ?");
        assert_eq!(
            fragment.params,
            vec![
                SqlValue::Decimal(Decimal::from_str("0.0").unwrap()),
                SqlValue::Decimal(Decimal::from_str("500.0").unwrap()),
            ]
        );
    }

    #[test]
    fn between_requires_exactly_two_values() {
        let err = build(&[search(
            "decimal_col",
            serde_json::json!([1, 2, 3]),
            FilterOperator::Between,
        )])
        .unwrap_err();
        assert!(err.to_string().contains("exactly 2"));
    }

    #[test]
    fn cast_wraps_field_and_retargets_value() {
        let fragment = build(&[Search {
            column: "string_int".into(),
            value: Some(serde_json::json!(50)),
            filter_operator: FilterOperator::Equals,
            cast_type: Some("INTEGER".into()),
            ..Default::default()
        }])
        .unwrap()
        .unwrap();

        assert_eq!(fragment.sql, "CAST(\"string_int\" AS integer) = ?");
        assert_eq!(fragment.params, vec![SqlValue::Integer(50)]);
    }

    #[test]
    fn datetime_equality_becomes_one_second_window() {
        let fragment = build(&[search(
            "ts_col",
            serde_json::json!("2024-03-01T10:15:30"),
            FilterOperator::Equals,
        )])
        .unwrap()
        .unwrap();

        assert_eq!(fragment.sql, "\"ts_col\" BETWEEN ? AND ?");
        match (&fragment.params[0], &fragment.params[1]) {
            (SqlValue::DateTime(lower), SqlValue::DateTime(upper)) => {
                assert_eq!(*upper - *lower, Duration::seconds(1));
            }
            other => panic!("unexpected params: {:?}", other),
        }
    }

    #[test]
    fn datetime_inequality_uses_not_between() {
        let fragment = build(&[search(
            "ts_col",
            serde_json::json!("2024-03-01T10:15:30"),
            FilterOperator::NotEquals,
        )])
        .unwrap()
        .unwrap();

        assert_eq!(fragment.sql, "\"ts_col\" NOT BETWEEN ? AND ?");
    }

    #[test]
    fn null_equality_rewrites_to_is_null() {
        let fragment = build(&[search(
            "varchar_col",
            serde_json::Value::Null,
            FilterOperator::Equals,
        )])
        .unwrap()
        .unwrap();
        assert_eq!(fragment.sql, "\"varchar_col\" IS NULL");
        assert!(fragment.params.is_empty());

        let fragment = build(&[search(
            "varchar_col",
            serde_json::Value::Null,
            FilterOperator::NotEquals,
        )])
        .unwrap()
        .unwrap();
        assert_eq!(fragment.sql, "\"varchar_col\" IS NOT NULL");
    }

    #[test]
    fn in_promotes_singleton() {
        let from_scalar = build(&[search(
            "decimal_col",
            serde_json::json!(5),
            FilterOperator::In,
        )])
        .unwrap()
        .unwrap();
        let from_list = build(&[search(
            "decimal_col",
            serde_json::json!([5]),
            FilterOperator::In,
        )])
        .unwrap()
        .unwrap();

        assert_eq!(from_scalar, from_list);
        assert_eq!(from_scalar.sql, "\"decimal_col\" IN (?)");
    }

    #[test]
    fn in_rejects_empty_array() {
        let err = build(&[search(
            "decimal_col",
            serde_json::json!([]),
            FilterOperator::In,
        )])
        .unwrap_err();
        assert!(err.to_string().contains("non-empty"));
    }

    #[test]
    fn unknown_column_is_invalid_argument() {
        let err = build(&[search(
            "missing_col",
            serde_json::json!(1),
            FilterOperator::Equals,
        )])
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
        assert!(err.to_string().contains("missing_col"));
    }

    #[test]
    fn qualified_column_requires_known_alias() {
        let ok = build(&[search(
            "o.price",
            serde_json::json!(500),
            FilterOperator::GreaterThan,
        )])
        .unwrap()
        .unwrap();
        assert_eq!(ok.sql, "\"o\".\"price\" > ?");
        // Type inferred from the value itself
        assert_eq!(ok.params, vec![SqlValue::Bigint(500)]);

        let err = build(&[search(
            "x.price",
            serde_json::json!(500),
            FilterOperator::GreaterThan,
        )])
        .unwrap_err();
        assert!(err.to_string().contains("Unknown qualifier"));
    }

    #[test]
    fn combining_is_left_associative_and_ignores_last_operator() {
        let mut first = search("varchar_col", serde_json::json!("a"), FilterOperator::Equals);
        first.logical_operator = LogicalOperator::Or;
        let mut second = search("decimal_col", serde_json::json!(1), FilterOperator::Equals);
        second.logical_operator = LogicalOperator::And;
        // Last operator would be OR, but it never participates
        let mut third = search("string_int", serde_json::json!("b"), FilterOperator::Equals);
        third.logical_operator = LogicalOperator::Or;

        let fragment = build(&[first, second, third]).unwrap().unwrap();
        assert_eq!(
            fragment.sql,
            "((\"varchar_col\" = ? OR \"decimal_col\" = ?) AND \"string_int\" = ?)"
        );
        assert_eq!(fragment.params.len(), 3);
    }

    #[test]
    fn mysql_dialect_quotes_with_backticks() {
        let schema = schema();
        let scope = FilterScope::base_only("test_data_all_types");
        let fragment = build_condition(
            &[search("varchar_col", serde_json::json!("x"), FilterOperator::Equals)],
            &schema,
            &scope,
            SqlDialect::MySql,
        )
        .unwrap()
        .unwrap();

        assert_eq!(fragment.sql, "`varchar_col` = ?");
    }
}
