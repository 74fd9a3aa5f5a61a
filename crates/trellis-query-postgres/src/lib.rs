//! PostgreSQL backend for the Trellis query gateway
//!
//! Implements `QueryContext` over tokio-postgres. Each context holds a small
//! fixed set of clients picked round-robin, so parallel requests against the
//! same descriptor can stream independently while the registry keeps a single
//! entry per descriptor.

use async_trait::async_trait;
use futures::stream::StreamExt;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error};
use trellis_query::{
    ColumnInfo, DatabaseDescriptor, QueryContext, QueryError, Result, RowStream, SelectColumn,
    SqlDialect, SqlType, Statement, TableSchema,
};

/// Clients held per context; one is enough for correctness, a few allow
/// parallel streams on the same descriptor
const CLIENTS_PER_CONTEXT: usize = 4;

/// PostgreSQL execution context
#[derive(Debug)]
pub struct PostgresContext {
    clients: Vec<Arc<Client>>,
    next: AtomicUsize,
    schema: String,
}

impl PostgresContext {
    /// Open a new context for a descriptor
    pub async fn connect(descriptor: &DatabaseDescriptor) -> Result<Self> {
        let schema = descriptor
            .schema
            .clone()
            .unwrap_or_else(|| "public".to_string());

        let mut config = format!(
            "host={} port={} user={} password={} dbname={}",
            descriptor.host,
            descriptor.port,
            descriptor.username,
            descriptor.password,
            descriptor.database
        );
        if schema != "public" {
            config.push_str(&format!(" options='-c search_path={}'", schema));
        }

        debug!(
            "Connecting to PostgreSQL: {}@{}:{}/{}",
            descriptor.username, descriptor.host, descriptor.port, descriptor.database
        );

        let mut clients = Vec::with_capacity(CLIENTS_PER_CONTEXT);
        for _ in 0..CLIENTS_PER_CONTEXT {
            let (client, connection) =
                tokio_postgres::connect(&config, NoTls).await.map_err(|e| {
                    QueryError::Backend(format!("PostgreSQL connection failed: {}", e))
                })?;

            // Each client drives its socket from a background task
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("PostgreSQL connection error: {}", e);
                }
            });

            clients.push(Arc::new(client));
        }

        debug!(
            "Connected to PostgreSQL database: {}",
            descriptor.database
        );

        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
            schema,
        })
    }

    fn client(&self) -> Arc<Client> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        self.clients[index].clone()
    }

    /// Map a PostgreSQL declared type to the canonical coercion type
    fn map_pg_type(pg_type: &str) -> SqlType {
        match pg_type {
            "boolean" | "bool" => SqlType::Boolean,
            "smallint" | "int2" | "integer" | "int" | "int4" => SqlType::Integer,
            "bigint" | "int8" => SqlType::Bigint,
            "real" | "float4" | "double precision" | "float8" | "numeric" | "decimal" => {
                SqlType::Decimal
            }
            "character varying" | "varchar" | "text" => SqlType::Varchar,
            "character" | "char" | "bpchar" => SqlType::Char,
            "date" => SqlType::Date,
            "time" | "time without time zone" => SqlType::Time,
            "timestamp" | "timestamp without time zone" | "timestamp with time zone"
            | "timestamptz" => SqlType::DateTime,
            "json" => SqlType::Json,
            "jsonb" => SqlType::Jsonb,
            "uuid" => SqlType::Uuid,
            _ => SqlType::Other,
        }
    }

    /// Extract one column value as JSON
    fn extract_value(row: &Row, idx: usize) -> serde_json::Value {
        let type_name = row.columns()[idx].type_().name();

        match type_name {
            "bool" => row
                .try_get::<_, Option<bool>>(idx)
                .ok()
                .flatten()
                .map(serde_json::Value::Bool)
                .unwrap_or(serde_json::Value::Null),

            "int2" => row
                .try_get::<_, Option<i16>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),

            "int4" => row
                .try_get::<_, Option<i32>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),

            "int8" => row
                .try_get::<_, Option<i64>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),

            "float4" => row
                .try_get::<_, Option<f32>>(idx)
                .ok()
                .flatten()
                .and_then(|v| serde_json::Number::from_f64(v as f64))
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),

            "float8" => row
                .try_get::<_, Option<f64>>(idx)
                .ok()
                .flatten()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),

            "numeric" => row
                .try_get::<_, Option<Decimal>>(idx)
                .ok()
                .flatten()
                .and_then(|d| d.to_f64())
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),

            "varchar" | "text" | "char" | "bpchar" | "name" => row
                .try_get::<_, Option<String>>(idx)
                .ok()
                .flatten()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),

            // Temporals go out as ISO strings, never epoch numbers
            "date" => row
                .try_get::<_, Option<chrono::NaiveDate>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.format("%Y-%m-%d").to_string()))
                .unwrap_or(serde_json::Value::Null),

            "time" => row
                .try_get::<_, Option<chrono::NaiveTime>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.format("%H:%M:%S%.f").to_string()))
                .unwrap_or(serde_json::Value::Null),

            "timestamp" => row
                .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
                .ok()
                .flatten()
                .map(|v| {
                    serde_json::Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
                })
                .unwrap_or(serde_json::Value::Null),

            "timestamptz" => row
                .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_rfc3339()))
                .unwrap_or(serde_json::Value::Null),

            "json" | "jsonb" => row
                .try_get::<_, Option<serde_json::Value>>(idx)
                .ok()
                .flatten()
                .unwrap_or(serde_json::Value::Null),

            "uuid" => row
                .try_get::<_, Option<uuid::Uuid>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_string()))
                .unwrap_or(serde_json::Value::Null),

            _ => row
                .try_get::<_, Option<String>>(idx)
                .ok()
                .flatten()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
        }
    }

    fn map_error(e: tokio_postgres::Error) -> QueryError {
        if e.code() == Some(&SqlState::QUERY_CANCELED) {
            return QueryError::Cancelled(format!("PostgreSQL query cancelled: {}", e));
        }

        let message = if let Some(db_error) = e.as_db_error() {
            let mut msg = db_error.message().to_string();
            if let Some(detail) = db_error.detail() {
                msg.push_str(&format!("; detail: {}", detail));
            }
            if let Some(hint) = db_error.hint() {
                msg.push_str(&format!("; hint: {}", hint));
            }
            msg
        } else {
            e.to_string()
        };

        QueryError::Backend(message)
    }
}

/// Convert bind values into tokio-postgres parameters
fn to_sql_params(params: &[trellis_query::SqlValue]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    use trellis_query::SqlValue;

    params
        .iter()
        .map(|value| -> Box<dyn ToSql + Sync + Send> {
            match value {
                SqlValue::Null => Box::new(Option::<String>::None),
                SqlValue::Text(s) => Box::new(s.clone()),
                SqlValue::Integer(i) => Box::new(*i),
                SqlValue::Bigint(i) => Box::new(*i),
                SqlValue::Decimal(d) => Box::new(*d),
                SqlValue::Boolean(b) => Box::new(*b),
                SqlValue::Date(d) => Box::new(*d),
                SqlValue::Time(t) => Box::new(*t),
                SqlValue::DateTime(dt) => Box::new(*dt),
                SqlValue::Uuid(u) => Box::new(*u),
                // The driver needs a json value; fall back to the raw text
                // when the stored string is not valid JSON
                SqlValue::Json(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
                    Ok(value) => Box::new(value),
                    Err(_) => Box::new(raw.clone()),
                },
            }
        })
        .collect()
}

#[async_trait]
impl QueryContext for PostgresContext {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    async fn table_schema(&self, table: &str) -> Result<TableSchema> {
        let client = self.client();

        debug!("Resolving schema for table: {}.{}", self.schema, table);

        let resolved = client
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = $1 AND lower(table_name) = lower($2)",
                &[&self.schema, &table],
            )
            .await
            .map_err(Self::map_error)?;

        let table_name: String = match resolved.first() {
            Some(row) => row.get(0),
            None => {
                return Err(QueryError::NotFound(format!("Table not found: {}", table)));
            }
        };

        let rows = client
            .query(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
                &[&self.schema, &table_name],
            )
            .await
            .map_err(Self::map_error)?;

        let columns: Vec<ColumnInfo> = rows
            .iter()
            .map(|row| {
                let name: String = row.get(0);
                let data_type: String = row.get(1);
                ColumnInfo {
                    name,
                    sql_type: Self::map_pg_type(&data_type),
                    type_name: data_type,
                }
            })
            .collect();

        debug!("Found {} columns for table '{}'", columns.len(), table_name);

        Ok(TableSchema {
            table: table_name,
            columns,
        })
    }

    async fn query_stream(&self, statement: Statement) -> Result<RowStream> {
        let client = self.client();
        let params = to_sql_params(&statement.params);
        let columns: Arc<[SelectColumn]> = statement.columns.into();

        debug!("Executing query: {}", statement.sql);

        let rows = client
            .query_raw(statement.sql.as_str(), params)
            .await
            .map_err(Self::map_error)?;

        let shaped = rows.map(move |row| {
            let columns = columns.clone();
            row.map_err(Self::map_error).map(|row| {
                let values = (0..row.columns().len())
                    .map(|idx| Self::extract_value(&row, idx))
                    .collect();
                trellis_query::shape_row(&columns, values)
            })
        });

        Ok(Box::pin(shaped))
    }

    async fn query_count(&self, statement: Statement) -> Result<i64> {
        let client = self.client();
        let params = to_sql_params(&statement.params);
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        debug!("Executing count: {}", statement.sql);

        let row = client
            .query_one(statement.sql.as_str(), &refs)
            .await
            .map_err(Self::map_error)?;

        Ok(row.get::<_, i64>(0))
    }

    async fn execute(&self, statement: Statement) -> Result<u64> {
        let client = self.client();
        let params = to_sql_params(&statement.params);
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        debug!("Executing statement: {}", statement.sql);

        client
            .execute(statement.sql.as_str(), &refs)
            .await
            .map_err(Self::map_error)
    }

    async fn ping(&self) -> Result<()> {
        self.client()
            .simple_query("SELECT 1")
            .await
            .map_err(Self::map_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing PostgreSQL context");
        // Connections shut down when the clients drop
        Ok(())
    }
}
