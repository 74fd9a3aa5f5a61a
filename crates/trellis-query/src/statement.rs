//! Statement assembly: compose the final SELECT / SELECT COUNT / DELETE from
//! base table, joins, condition tree, ordering and pagination.
//!
//! Statements are rendered with `?` placeholders and finalized per dialect
//! (`$1..$n` for Postgres). Alongside the SQL, SELECT statements carry the
//! projected column list so the row shaper can qualify result keys without
//! asking the driver.

use crate::error::{QueryError, Result};
use crate::filter::{build_condition, FilterScope};
use crate::types::{JoinType, QueryRequest, SqlDialect, SqlValue, TableSchema};

/// One projected output column with the qualifier it was selected through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectColumn {
    pub qualifier: String,
    pub name: String,
}

/// A ready-to-execute statement: dialect-final SQL, bind values in
/// placeholder order, and (for SELECT) the projection metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub columns: Vec<SelectColumn>,
}

/// Assemble the row-streaming SELECT for a request
pub fn assemble_select(
    request: &QueryRequest,
    schema: &TableSchema,
    dialect: SqlDialect,
) -> Result<Statement> {
    let scope = scope_with_joins(request);
    let (projection, columns) = build_projection(request, schema, dialect)?;

    let mut sql = String::from("SELECT ");
    if request.distinct {
        sql.push_str("DISTINCT ");
    }
    sql.push_str(&projection);
    sql.push_str(" FROM ");
    sql.push_str(&base_table(request, dialect));
    sql.push_str(&join_clause(request, dialect)?);

    let mut params = Vec::new();
    if let Some(condition) = build_condition(request.filters(), schema, &scope, dialect)? {
        sql.push_str(" WHERE ");
        sql.push_str(&condition.sql);
        params = condition.params;
    }

    if let Some(order_by) = &request.order_by {
        let direction = request
            .order_direction
            .map(|d| d.sql())
            .unwrap_or("ASC");
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_field(order_by, schema, dialect)?);
        sql.push(' ');
        sql.push_str(direction);
    }

    match request.limit {
        Some(limit) if limit > 0 => {
            sql.push_str(&format!(" LIMIT {}", limit));
            // OFFSET without LIMIT is ignored
            if let Some(offset) = request.offset {
                if offset > 0 {
                    sql.push_str(&format!(" OFFSET {}", offset));
                }
            }
        }
        _ => {}
    }

    Ok(Statement {
        sql: finalize(&sql, dialect),
        params,
        columns,
    })
}

/// Assemble the COUNT(*) variant: same FROM/JOIN/WHERE, no ordering or
/// pagination
pub fn assemble_count(
    request: &QueryRequest,
    schema: &TableSchema,
    dialect: SqlDialect,
) -> Result<Statement> {
    let scope = scope_with_joins(request);

    let mut sql = String::from("SELECT COUNT(*) FROM ");
    sql.push_str(&base_table(request, dialect));
    sql.push_str(&join_clause(request, dialect)?);

    let mut params = Vec::new();
    if let Some(condition) = build_condition(request.filters(), schema, &scope, dialect)? {
        sql.push_str(" WHERE ");
        sql.push_str(&condition.sql);
        params = condition.params;
    }

    Ok(Statement {
        sql: finalize(&sql, dialect),
        params,
        columns: Vec::new(),
    })
}

/// Assemble the DELETE variant.
///
/// Joins, ordering and pagination are ignored even when present in the
/// request; an empty predicate is rejected before any SQL is issued.
pub fn assemble_delete(
    request: &QueryRequest,
    schema: &TableSchema,
    dialect: SqlDialect,
) -> Result<Statement> {
    let scope = FilterScope::base_only(request.effective_alias());

    let condition = build_condition(request.filters(), schema, &scope, dialect)?
        .ok_or_else(|| {
            QueryError::InvalidArgument("Deletion without filter is not allowed".to_string())
        })?;

    let sql = format!(
        "DELETE FROM {} WHERE {}",
        base_table(request, dialect),
        condition.sql
    );

    Ok(Statement {
        sql: finalize(&sql, dialect),
        params: condition.params,
        columns: Vec::new(),
    })
}

fn scope_with_joins(request: &QueryRequest) -> FilterScope<'_> {
    FilterScope {
        effective_alias: request.effective_alias(),
        join_aliases: request.joins().iter().map(|j| j.effective_alias()).collect(),
    }
}

/// `<table> AS <alias>` when aliased, else just the table
fn base_table(request: &QueryRequest, dialect: SqlDialect) -> String {
    match &request.alias {
        Some(alias) => format!(
            "{} AS {}",
            dialect.quote(&request.table),
            dialect.quote(alias)
        ),
        None => dialect.quote(&request.table),
    }
}

/// Fold the request's joins into SQL, validating each descriptor
fn join_clause(request: &QueryRequest, dialect: SqlDialect) -> Result<String> {
    let joins = request.joins();

    // RIGHT joins interact poorly with multi-join chains on several
    // backends; they are only accepted alone
    if joins.len() > 1 && joins.iter().any(|j| j.join_type == JoinType::Right) {
        return Err(QueryError::InvalidArgument(
            "RIGHT join is only supported in single-join queries".to_string(),
        ));
    }

    let mut sql = String::new();
    for join in joins {
        if join.on_left.is_empty() || join.on_left.len() != join.on_right.len() {
            return Err(QueryError::InvalidArgument(format!(
                "Mismatched join fields in join for table: {}",
                join.table
            )));
        }

        let join_table = match &join.alias {
            Some(alias) => format!("{} AS {}", dialect.quote(&join.table), dialect.quote(alias)),
            None => dialect.quote(&join.table),
        };

        let on = join
            .on_left
            .iter()
            .zip(&join.on_right)
            .map(|(left, right)| {
                Ok(format!(
                    "{} = {}",
                    qualified_path(left, dialect)?,
                    qualified_path(right, dialect)?
                ))
            })
            .collect::<Result<Vec<_>>>()?
            .join(" AND ");

        sql.push_str(&format!(" {} {} ON {}", join.join_type.sql(), join_table, on));
    }

    Ok(sql)
}

/// Render a `qualifier.column` path, rejecting anything else
fn qualified_path(path: &str, dialect: SqlDialect) -> Result<String> {
    match path.split_once('.') {
        Some((qualifier, column))
            if !qualifier.is_empty() && !column.is_empty() && !column.contains('.') =>
        {
            Ok(format!(
                "{}.{}",
                dialect.quote(qualifier),
                dialect.quote(column)
            ))
        }
        _ => Err(QueryError::InvalidArgument(format!(
            "Invalid field path: {} (expected format: alias.column)",
            path
        ))),
    }
}

/// Projection SQL plus the matching output-column metadata
fn build_projection(
    request: &QueryRequest,
    schema: &TableSchema,
    dialect: SqlDialect,
) -> Result<(String, Vec<SelectColumn>)> {
    let alias = request.effective_alias();

    let fields = match &request.select_fields {
        Some(fields) if !fields.is_empty() => fields.as_slice(),
        // Default projection: the base table's columns in schema order,
        // join columns are not implicitly projected
        _ => {
            let mut sql_parts = Vec::with_capacity(schema.columns.len());
            let mut columns = Vec::with_capacity(schema.columns.len());
            for column in &schema.columns {
                sql_parts.push(format!(
                    "{}.{}",
                    dialect.quote(alias),
                    dialect.quote(&column.name)
                ));
                columns.push(SelectColumn {
                    qualifier: alias.to_string(),
                    name: column.name.clone(),
                });
            }
            return Ok((sql_parts.join(", "), columns));
        }
    };

    let mut sql_parts = Vec::with_capacity(fields.len());
    let mut columns = Vec::with_capacity(fields.len());

    for field in fields {
        if let Some((qualifier, name)) = field.split_once('.') {
            if qualifier.is_empty() || name.is_empty() || name.contains('.') {
                return Err(QueryError::InvalidArgument(format!(
                    "Invalid field path: {} (expected format: alias.column)",
                    field
                )));
            }
            sql_parts.push(format!(
                "{}.{}",
                dialect.quote(qualifier),
                dialect.quote(name)
            ));
            columns.push(SelectColumn {
                qualifier: qualifier.to_string(),
                name: name.to_string(),
            });
        } else {
            let info = schema.column(field).ok_or_else(|| {
                QueryError::InvalidArgument(format!("Unknown column: {}", field))
            })?;
            sql_parts.push(format!(
                "{}.{}",
                dialect.quote(alias),
                dialect.quote(&info.name)
            ));
            columns.push(SelectColumn {
                qualifier: alias.to_string(),
                name: info.name.clone(),
            });
        }
    }

    Ok((sql_parts.join(", "), columns))
}

/// Render the ORDER BY field; dotted paths are qualified references
fn order_field(order_by: &str, schema: &TableSchema, dialect: SqlDialect) -> Result<String> {
    if let Some((qualifier, name)) = order_by.split_once('.') {
        if qualifier.is_empty() || name.is_empty() || name.contains('.') {
            return Err(QueryError::InvalidArgument(format!(
                "Invalid field path: {} (expected format: alias.column)",
                order_by
            )));
        }
        Ok(format!(
            "{}.{}",
            dialect.quote(qualifier),
            dialect.quote(name)
        ))
    } else {
        let info = schema.column(order_by).ok_or_else(|| {
            QueryError::InvalidArgument(format!("Unknown column: {}", order_by))
        })?;
        Ok(dialect.quote(&info.name))
    }
}

/// Rewrite `?` placeholders into the dialect's bind markers
fn finalize(sql: &str, dialect: SqlDialect) -> String {
    match dialect {
        SqlDialect::MySql => sql.to_string(),
        SqlDialect::Postgres => {
            let mut out = String::with_capacity(sql.len() + 8);
            let mut index = 0;
            for ch in sql.chars() {
                if ch == '?' {
                    index += 1;
                    out.push('$');
                    out.push_str(&index.to_string());
                } else {
                    out.push(ch);
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ColumnInfo, FilterOperator, JoinRequest, OrderDirection, Search, SqlType,
    };

    fn user_schema() -> TableSchema {
        TableSchema {
            table: "user_table".into(),
            columns: vec![
                ColumnInfo {
                    name: "id".into(),
                    sql_type: SqlType::Bigint,
                    type_name: "bigint".into(),
                },
                ColumnInfo {
                    name: "name".into(),
                    sql_type: SqlType::Varchar,
                    type_name: "character varying".into(),
                },
            ],
        }
    }

    fn filter(column: &str, value: serde_json::Value, op: FilterOperator) -> Search {
        Search {
            column: column.into(),
            value: Some(value),
            filter_operator: op,
            ..Default::default()
        }
    }

    fn join(table: &str, alias: &str, left: &str, right: &str) -> JoinRequest {
        JoinRequest {
            join_type: JoinType::Inner,
            table: table.into(),
            alias: Some(alias.into()),
            on_left: vec![left.into()],
            on_right: vec![right.into()],
        }
    }

    #[test]
    fn default_projection_is_base_table_in_schema_order() {
        let request = QueryRequest {
            table: "user_table".into(),
            ..Default::default()
        };

        let statement =
            assemble_select(&request, &user_schema(), SqlDialect::Postgres).unwrap();

        assert_eq!(
            statement.sql,
            "SELECT \"user_table\".\"id\", \"user_table\".\"name\" FROM \"user_table\""
        );
        assert_eq!(
            statement.columns,
            vec![
                SelectColumn {
                    qualifier: "user_table".into(),
                    name: "id".into()
                },
                SelectColumn {
                    qualifier: "user_table".into(),
                    name: "name".into()
                },
            ]
        );
    }

    #[test]
    fn join_with_filter_renders_postgres_placeholders() {
        let request = QueryRequest {
            table: "user_table".into(),
            alias: Some("u".into()),
            joins: Some(vec![join("order_table", "o", "u.id", "o.user_id")]),
            filters: Some(vec![filter(
                "o.price",
                serde_json::json!(500),
                FilterOperator::GreaterThan,
            )]),
            ..Default::default()
        };

        let statement =
            assemble_select(&request, &user_schema(), SqlDialect::Postgres).unwrap();

        assert_eq!(
            statement.sql,
            "SELECT \"u\".\"id\", \"u\".\"name\" FROM \"user_table\" AS \"u\" \
             JOIN \"order_table\" AS \"o\" ON \"u\".\"id\" = \"o\".\"user_id\" \
             WHERE \"o\".\"price\" > $1"
        );
        assert_eq!(statement.params.len(), 1);
    }

    #[test]
    fn multi_column_on_condition_is_conjunction() {
        let request = QueryRequest {
            table: "user_table".into(),
            alias: Some("u".into()),
            joins: Some(vec![JoinRequest {
                join_type: JoinType::Left,
                table: "order_table".into(),
                alias: Some("o".into()),
                on_left: vec!["u.id".into(), "u.tenant_id".into()],
                on_right: vec!["o.user_id".into(), "o.tenant_id".into()],
            }]),
            ..Default::default()
        };

        let statement =
            assemble_select(&request, &user_schema(), SqlDialect::Postgres).unwrap();

        assert!(statement.sql.contains(
            "LEFT JOIN \"order_table\" AS \"o\" ON \"u\".\"id\" = \"o\".\"user_id\" \
             AND \"u\".\"tenant_id\" = \"o\".\"tenant_id\""
        ));
    }

    #[test]
    fn mismatched_on_lists_are_rejected() {
        let request = QueryRequest {
            table: "user_table".into(),
            joins: Some(vec![JoinRequest {
                join_type: JoinType::Inner,
                table: "order_table".into(),
                alias: None,
                on_left: vec!["u.id".into()],
                on_right: vec![],
            }]),
            ..Default::default()
        };

        let err = assemble_select(&request, &user_schema(), SqlDialect::Postgres).unwrap_err();
        assert!(err.to_string().contains("Mismatched join fields"));
    }

    #[test]
    fn bad_join_path_is_rejected() {
        let request = QueryRequest {
            table: "user_table".into(),
            joins: Some(vec![join("order_table", "o", "id", "o.user_id")]),
            ..Default::default()
        };

        let err = assemble_select(&request, &user_schema(), SqlDialect::Postgres).unwrap_err();
        assert!(err.to_string().contains("Invalid field path"));
    }

    #[test]
    fn right_join_is_single_join_only() {
        let right = JoinRequest {
            join_type: JoinType::Right,
            table: "order_table".into(),
            alias: Some("o".into()),
            on_left: vec!["u.id".into()],
            on_right: vec!["o.user_id".into()],
        };

        let single = QueryRequest {
            table: "user_table".into(),
            alias: Some("u".into()),
            joins: Some(vec![right.clone()]),
            ..Default::default()
        };
        assert!(assemble_select(&single, &user_schema(), SqlDialect::Postgres).is_ok());

        let chained = QueryRequest {
            table: "user_table".into(),
            alias: Some("u".into()),
            joins: Some(vec![
                right,
                join("payment_table", "p", "o.id", "p.order_id"),
            ]),
            ..Default::default()
        };
        let err = assemble_select(&chained, &user_schema(), SqlDialect::Postgres).unwrap_err();
        assert!(err.to_string().contains("RIGHT join"));
    }

    #[test]
    fn order_limit_offset_render_in_order() {
        let request = QueryRequest {
            table: "user_table".into(),
            order_by: Some("name".into()),
            order_direction: Some(OrderDirection::Desc),
            limit: Some(10),
            offset: Some(20),
            ..Default::default()
        };

        let statement = assemble_select(&request, &user_schema(), SqlDialect::MySql).unwrap();
        assert!(statement
            .sql
            .ends_with("ORDER BY `name` DESC LIMIT 10 OFFSET 20"));
    }

    #[test]
    fn offset_without_limit_is_ignored() {
        let request = QueryRequest {
            table: "user_table".into(),
            offset: Some(20),
            ..Default::default()
        };

        let statement =
            assemble_select(&request, &user_schema(), SqlDialect::Postgres).unwrap();
        assert!(!statement.sql.contains("OFFSET"));
        assert!(!statement.sql.contains("LIMIT"));
    }

    #[test]
    fn distinct_prefixes_projection() {
        let request = QueryRequest {
            table: "user_table".into(),
            select_fields: Some(vec!["name".into()]),
            distinct: true,
            ..Default::default()
        };

        let statement =
            assemble_select(&request, &user_schema(), SqlDialect::Postgres).unwrap();
        assert!(statement
            .sql
            .starts_with("SELECT DISTINCT \"user_table\".\"name\""));
    }

    #[test]
    fn count_drops_order_and_pagination() {
        let request = QueryRequest {
            table: "user_table".into(),
            order_by: Some("name".into()),
            limit: Some(5),
            filters: Some(vec![filter(
                "name",
                serde_json::json!("Alice"),
                FilterOperator::Equals,
            )]),
            ..Default::default()
        };

        let statement = assemble_count(&request, &user_schema(), SqlDialect::Postgres).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT COUNT(*) FROM \"user_table\" WHERE \"name\" = $1"
        );
    }

    #[test]
    fn delete_requires_a_predicate() {
        let request = QueryRequest {
            table: "user_table".into(),
            ..Default::default()
        };

        let err = assemble_delete(&request, &user_schema(), SqlDialect::Postgres).unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
        assert!(err.to_string().contains("without filter"));
    }

    #[test]
    fn delete_ignores_joins_and_pagination() {
        let request = QueryRequest {
            table: "user_table".into(),
            joins: Some(vec![join("order_table", "o", "u.id", "o.user_id")]),
            limit: Some(5),
            order_by: Some("name".into()),
            filters: Some(vec![filter(
                "id",
                serde_json::json!(9),
                FilterOperator::Equals,
            )]),
            ..Default::default()
        };

        let statement = assemble_delete(&request, &user_schema(), SqlDialect::Postgres).unwrap();
        assert_eq!(statement.sql, "DELETE FROM \"user_table\" WHERE \"id\" = $1");
    }

    #[test]
    fn unknown_select_column_is_rejected() {
        let request = QueryRequest {
            table: "user_table".into(),
            select_fields: Some(vec!["missing".into()]),
            ..Default::default()
        };

        let err = assemble_select(&request, &user_schema(), SqlDialect::Postgres).unwrap_err();
        assert!(err.to_string().contains("Unknown column: missing"));
    }

    #[test]
    fn placeholder_rewrite_numbers_sequentially() {
        let request = QueryRequest {
            table: "user_table".into(),
            filters: Some(vec![
                filter("id", serde_json::json!([1, 2]), FilterOperator::In),
                filter("name", serde_json::json!("x"), FilterOperator::Equals),
            ]),
            ..Default::default()
        };

        let statement =
            assemble_select(&request, &user_schema(), SqlDialect::Postgres).unwrap();
        assert!(statement.sql.contains("\"id\" IN ($1, $2)"));
        assert!(statement.sql.contains("\"name\" = $3"));
    }
}
