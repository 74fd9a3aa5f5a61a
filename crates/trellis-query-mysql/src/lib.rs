//! MySQL backend for the Trellis query gateway
//!
//! Implements `QueryContext` over a sqlx connection pool. Streaming keeps a
//! pooled connection checked out for the duration of one result set and
//! hands rows to the response through a bounded channel, so client
//! back-pressure slows row production.

use async_trait::async_trait;
use futures::stream::StreamExt;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlColumn, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row};
use tracing::debug;
use trellis_query::{
    ColumnInfo, DatabaseDescriptor, QueryContext, QueryError, Result, RowStream, SelectColumn,
    SqlDialect, SqlType, SqlValue, Statement, TableSchema,
};

/// Upper bound on pooled connections per descriptor
const POOL_MAX_CONNECTIONS: u32 = 6;

/// Rows buffered between the driver and the response stream
const STREAM_BUFFER: usize = 16;

/// MySQL execution context
#[derive(Debug)]
pub struct MySqlContext {
    pool: MySqlPool,
    schema: String,
}

impl MySqlContext {
    /// Open a new context for a descriptor
    pub async fn connect(descriptor: &DatabaseDescriptor) -> Result<Self> {
        let url = format!(
            "mysql://{}:{}@{}:{}/{}",
            descriptor.username,
            descriptor.password,
            descriptor.host,
            descriptor.port,
            descriptor.database
        );

        debug!(
            "Connecting to MySQL: {}@{}:{}/{}",
            descriptor.username, descriptor.host, descriptor.port, descriptor.database
        );

        let pool = MySqlPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .connect(&url)
            .await
            .map_err(|e| QueryError::Backend(format!("MySQL connection failed: {}", e)))?;

        // MySQL has no separate schema level; an explicit schema overrides
        // the database for metadata lookups
        let schema = descriptor
            .schema
            .clone()
            .unwrap_or_else(|| descriptor.database.clone());

        debug!("Connected to MySQL database: {}", descriptor.database);

        Ok(Self { pool, schema })
    }

    /// Map a MySQL declared type to the canonical coercion type
    fn map_mysql_type(data_type: &str, column_type: &str) -> SqlType {
        match data_type {
            // tinyint(1) is the conventional boolean
            "tinyint" if column_type.starts_with("tinyint(1)") => SqlType::Boolean,
            "tinyint" | "smallint" | "mediumint" | "int" => SqlType::Integer,
            "bigint" => SqlType::Bigint,
            "decimal" | "numeric" | "float" | "double" => SqlType::Decimal,
            "char" => SqlType::Char,
            "varchar" | "text" | "tinytext" | "mediumtext" | "longtext" | "enum" => {
                SqlType::Varchar
            }
            "date" => SqlType::Date,
            "time" => SqlType::Time,
            "datetime" | "timestamp" => SqlType::DateTime,
            "json" => SqlType::Json,
            _ => SqlType::Other,
        }
    }

    /// Extract one column value as JSON, keyed on the driver's type name
    fn extract_value(row: &MySqlRow, column: &MySqlColumn) -> serde_json::Value {
        use sqlx::TypeInfo;

        let idx = column.ordinal();
        let type_name = column.type_info().name();

        match type_name {
            "BOOLEAN" => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(serde_json::Value::Bool)
                .unwrap_or(serde_json::Value::Null),

            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" => row
                .try_get::<Option<i32>, _>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),

            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED" => {
                row.try_get::<Option<u32>, _>(idx)
                    .ok()
                    .flatten()
                    .map(|v| serde_json::Value::Number(v.into()))
                    .unwrap_or(serde_json::Value::Null)
            }

            "BIGINT" => row
                .try_get::<Option<i64>, _>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),

            "BIGINT UNSIGNED" => row
                .try_get::<Option<u64>, _>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),

            "FLOAT" => row
                .try_get::<Option<f32>, _>(idx)
                .ok()
                .flatten()
                .and_then(|v| serde_json::Number::from_f64(v as f64))
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),

            "DOUBLE" => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),

            "DECIMAL" => row
                .try_get::<Option<Decimal>, _>(idx)
                .ok()
                .flatten()
                .and_then(|d| d.to_f64())
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),

            // Temporals go out as ISO strings
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.format("%Y-%m-%d").to_string()))
                .unwrap_or(serde_json::Value::Null),

            "TIME" => row
                .try_get::<Option<chrono::NaiveTime>, _>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.format("%H:%M:%S%.f").to_string()))
                .unwrap_or(serde_json::Value::Null),

            "DATETIME" | "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
                .ok()
                .flatten()
                .map(|v| {
                    serde_json::Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
                })
                .unwrap_or(serde_json::Value::Null),

            "JSON" => row
                .try_get::<Option<serde_json::Value>, _>(idx)
                .ok()
                .flatten()
                .unwrap_or(serde_json::Value::Null),

            _ => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
        }
    }

    fn map_error(e: sqlx::Error) -> QueryError {
        match e {
            sqlx::Error::RowNotFound => QueryError::NotFound("Row not found".to_string()),
            other => QueryError::Backend(format!("MySQL error: {}", other)),
        }
    }
}

/// Bind typed values onto a sqlx query
fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    params: &'q [SqlValue],
) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
    for value in params {
        query = match value {
            SqlValue::Null => query.bind(Option::<String>::None),
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Integer(i) => query.bind(*i),
            SqlValue::Bigint(i) => query.bind(*i),
            SqlValue::Decimal(d) => query.bind(*d),
            SqlValue::Boolean(b) => query.bind(*b),
            SqlValue::Date(d) => query.bind(*d),
            SqlValue::Time(t) => query.bind(*t),
            SqlValue::DateTime(dt) => query.bind(*dt),
            // MySQL has no uuid type; bind the canonical text form
            SqlValue::Uuid(u) => query.bind(u.to_string()),
            SqlValue::Json(raw) => query.bind(raw.clone()),
        };
    }
    query
}

#[async_trait]
impl QueryContext for MySqlContext {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::MySql
    }

    async fn table_schema(&self, table: &str) -> Result<TableSchema> {
        debug!("Resolving schema for table: {}.{}", self.schema, table);

        let resolved: Option<(String,)> = sqlx::query_as(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = ? AND lower(table_name) = lower(?)",
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::map_error)?;

        let table_name = resolved
            .map(|(name,)| name)
            .ok_or_else(|| QueryError::NotFound(format!("Table not found: {}", table)))?;

        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT column_name, data_type, column_type FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ? ORDER BY ordinal_position",
        )
        .bind(&self.schema)
        .bind(&table_name)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_error)?;

        let columns: Vec<ColumnInfo> = rows
            .into_iter()
            .map(|(name, data_type, column_type)| ColumnInfo {
                sql_type: Self::map_mysql_type(&data_type, &column_type),
                type_name: data_type,
                name,
            })
            .collect();

        debug!("Found {} columns for table '{}'", columns.len(), table_name);

        Ok(TableSchema {
            table: table_name,
            columns,
        })
    }

    async fn query_stream(&self, statement: Statement) -> Result<RowStream> {
        let pool = self.pool.clone();
        let columns: Vec<SelectColumn> = statement.columns;
        let sql = statement.sql;
        let params = statement.params;

        debug!("Executing query: {}", sql);

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<trellis_query::JsonRow>>(STREAM_BUFFER);

        tokio::spawn(async move {
            let query = bind_params(sqlx::query(&sql), &params);
            let mut rows = query.fetch(&pool);

            while let Some(fetched) = rows.next().await {
                let item = fetched.map_err(Self::map_error).map(|row| {
                    let values = row
                        .columns()
                        .iter()
                        .map(|column| Self::extract_value(&row, column))
                        .collect();
                    trellis_query::shape_row(&columns, values)
                });

                // Receiver gone means the client went away; stop producing
                if tx.send(item).await.is_err() {
                    debug!("Row stream consumer dropped, aborting fetch");
                    break;
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn query_count(&self, statement: Statement) -> Result<i64> {
        debug!("Executing count: {}", statement.sql);

        let row = bind_params(sqlx::query(&statement.sql), &statement.params)
            .fetch_one(&self.pool)
            .await
            .map_err(Self::map_error)?;

        row.try_get::<i64, _>(0)
            .map_err(|e| QueryError::Backend(format!("MySQL error: {}", e)))
    }

    async fn execute(&self, statement: Statement) -> Result<u64> {
        debug!("Executing statement: {}", statement.sql);

        let result = bind_params(sqlx::query(&statement.sql), &statement.params)
            .execute(&self.pool)
            .await
            .map_err(Self::map_error)?;

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(Self::map_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing MySQL context");
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mysql_type_mapping_covers_canonical_types() {
        assert_eq!(MySqlContext::map_mysql_type("int", "int"), SqlType::Integer);
        assert_eq!(
            MySqlContext::map_mysql_type("bigint", "bigint"),
            SqlType::Bigint
        );
        assert_eq!(
            MySqlContext::map_mysql_type("decimal", "decimal(10,2)"),
            SqlType::Decimal
        );
        assert_eq!(
            MySqlContext::map_mysql_type("tinyint", "tinyint(1)"),
            SqlType::Boolean
        );
        assert_eq!(
            MySqlContext::map_mysql_type("tinyint", "tinyint(4)"),
            SqlType::Integer
        );
        assert_eq!(
            MySqlContext::map_mysql_type("varchar", "varchar(255)"),
            SqlType::Varchar
        );
        assert_eq!(
            MySqlContext::map_mysql_type("datetime", "datetime"),
            SqlType::DateTime
        );
        assert_eq!(MySqlContext::map_mysql_type("json", "json"), SqlType::Json);
        assert_eq!(MySqlContext::map_mysql_type("blob", "blob"), SqlType::Other);
    }
}
