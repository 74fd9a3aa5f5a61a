use crate::error::{QueryError, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// SQL dialects the gateway can target
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Postgres,
    MySql,
}

impl SqlDialect {
    /// Resolve a descriptor's `db_type` (case-insensitive)
    pub fn from_db_type(db_type: &str) -> Result<Self> {
        match db_type.to_uppercase().as_str() {
            "POSTGRES" => Ok(SqlDialect::Postgres),
            "MYSQL" => Ok(SqlDialect::MySql),
            other => Err(QueryError::InvalidArgument(format!(
                "Unsupported DB type: {}",
                other
            ))),
        }
    }

    /// Quote an identifier, escaping embedded quote characters
    pub fn quote(&self, ident: &str) -> String {
        match self {
            SqlDialect::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
            SqlDialect::MySql => format!("`{}`", ident.replace('`', "``")),
        }
    }

    /// Type name used inside a `CAST(.. AS ..)` expression
    pub fn cast_type_name(&self, target: SqlType) -> &'static str {
        match self {
            SqlDialect::Postgres => match target {
                SqlType::Varchar => "varchar",
                SqlType::Char => "char",
                SqlType::Integer => "integer",
                SqlType::Bigint => "bigint",
                SqlType::Decimal => "decimal",
                SqlType::Boolean => "boolean",
                SqlType::Date => "date",
                SqlType::Time => "time",
                SqlType::DateTime => "timestamp",
                SqlType::Uuid => "uuid",
                SqlType::Json => "json",
                SqlType::Jsonb => "jsonb",
                SqlType::Other => "text",
            },
            // MySQL CAST targets are a narrower set
            SqlDialect::MySql => match target {
                SqlType::Varchar | SqlType::Char | SqlType::Uuid => "CHAR",
                SqlType::Integer | SqlType::Bigint => "SIGNED",
                SqlType::Decimal => "DECIMAL(65,10)",
                SqlType::Boolean => "SIGNED",
                SqlType::Date => "DATE",
                SqlType::Time => "TIME",
                SqlType::DateTime => "DATETIME",
                SqlType::Json | SqlType::Jsonb => "JSON",
                SqlType::Other => "CHAR",
            },
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDialect::Postgres => write!(f, "postgres"),
            SqlDialect::MySql => write!(f, "mysql"),
        }
    }
}

/// Canonical SQL target types used by coercion and cast logic
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Varchar,
    Char,
    Integer,
    Bigint,
    Decimal,
    Boolean,
    Date,
    Time,
    DateTime,
    Uuid,
    Json,
    Jsonb,
    /// Backend type with no canonical mapping; values are bound by shape
    Other,
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlType::Varchar => "varchar",
            SqlType::Char => "char",
            SqlType::Integer => "integer",
            SqlType::Bigint => "bigint",
            SqlType::Decimal => "decimal",
            SqlType::Boolean => "boolean",
            SqlType::Date => "date",
            SqlType::Time => "time",
            SqlType::DateTime => "datetime",
            SqlType::Uuid => "uuid",
            SqlType::Json => "json",
            SqlType::Jsonb => "jsonb",
            SqlType::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// A typed value ready to be bound as a SQL parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i32),
    Bigint(i64),
    Decimal(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Uuid(Uuid),
    /// Raw JSON document, not reparsed at bind time
    Json(String),
}

/// One column of a resolved table schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name with the casing the backend reports
    pub name: String,
    /// Canonical type used for value coercion
    pub sql_type: SqlType,
    /// Declared type name as reported by the backend metadata
    pub type_name: String,
}

/// Ordered, case-insensitive column map for one `(descriptor, table)` pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name with the casing the backend reports
    pub table: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    /// Case-insensitive column lookup
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// Filter comparison operators
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    Like,
    In,
    NotIn,
    Between,
}

/// Logical connective applied between a filter and the next one
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    pub fn sql(&self) -> &'static str {
        match self {
            LogicalOperator::And => "AND",
            LogicalOperator::Or => "OR",
        }
    }
}

impl Default for LogicalOperator {
    fn default() -> Self {
        LogicalOperator::And
    }
}

/// Sort direction for `order_by`
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// Supported join types
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinType {
    Inner,
    Left,
    Right,
}

impl JoinType {
    pub fn sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
        }
    }
}

/// One filter predicate of a query request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Search {
    /// `col` or `qualifier.col`
    pub column: String,
    /// JSON scalar, array or null
    #[schema(value_type = Object)]
    pub value: Option<serde_json::Value>,
    pub filter_operator: FilterOperator,
    /// Connective between this filter and the next; the last one is ignored
    pub logical_operator: LogicalOperator,
    /// Optional cast forcing the SQL target type (STRING, INTEGER, DATETIME, ...)
    pub cast_type: Option<String>,
    /// Optional date/time parse pattern overriding the defaults
    pub cast_format: Option<String>,
}

impl Default for Search {
    fn default() -> Self {
        Self {
            column: String::new(),
            value: None,
            filter_operator: FilterOperator::Equals,
            logical_operator: LogicalOperator::And,
            cast_type: None,
            cast_format: None,
        }
    }
}

/// One join descriptor of a query request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub join_type: JoinType,
    /// Physical table name to join
    pub table: String,
    pub alias: Option<String>,
    /// `qualifier.column` paths; pairwise equal to `on_right`
    pub on_left: Vec<String>,
    pub on_right: Vec<String>,
}

impl JoinRequest {
    /// Alias if present, otherwise the joined table's own name
    pub fn effective_alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

/// Inline backend descriptor carried directly on a request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectDatabaseConfig {
    pub db_type: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
}

impl Default for DirectDatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: None,
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            schema: None,
        }
    }
}

impl DirectDatabaseConfig {
    /// Validate required fields and produce a full descriptor
    pub fn to_descriptor(&self) -> Result<DatabaseDescriptor> {
        let missing = |field: &str| {
            QueryError::InvalidArgument(format!(
                "Missing required field '{}' in directConfig",
                field
            ))
        };

        Ok(DatabaseDescriptor {
            id: None,
            name: None,
            db_type: self.db_type.clone().ok_or_else(|| missing("dbType"))?,
            host: self.host.clone().ok_or_else(|| missing("host"))?,
            port: self.port.ok_or_else(|| missing("port"))?,
            username: self.username.clone().ok_or_else(|| missing("username"))?,
            password: self.password.clone().ok_or_else(|| missing("password"))?,
            database: self.database.clone().ok_or_else(|| missing("database"))?,
            schema: self.schema.clone(),
        })
    }
}

/// Everything needed to open a SQL connection to a target backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseDescriptor {
    /// Store id when the descriptor is persisted; None for direct configs
    pub id: Option<String>,
    pub name: Option<String>,
    pub db_type: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub schema: Option<String>,
}

impl DatabaseDescriptor {
    pub fn dialect(&self) -> Result<SqlDialect> {
        SqlDialect::from_db_type(&self.db_type)
    }

    /// Registry cache key: stored id, or the deterministic direct key
    pub fn cache_key(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => self.direct_key(),
        }
    }

    /// Deterministic key for descriptors without a stored id
    pub fn direct_key(&self) -> String {
        [
            self.db_type.as_str(),
            self.host.as_str(),
            &self.port.to_string(),
            self.database.as_str(),
            self.username.as_str(),
            self.password.as_str(),
            self.schema.as_deref().unwrap_or(""),
        ]
        .join("::")
    }

    /// Connection URL without credentials, for logging
    pub fn display_url(&self) -> Result<String> {
        let scheme = match self.dialect()? {
            SqlDialect::Postgres => "postgres",
            SqlDialect::MySql => "mysql",
        };
        Ok(format!(
            "{}://{}:{}/{}",
            scheme, self.host, self.port, self.database
        ))
    }
}

/// The unit of work accepted by every gateway operation
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryRequest {
    /// Id of a stored descriptor; `direct_config` wins when both are present
    pub config_id: Option<String>,
    pub direct_config: Option<DirectDatabaseConfig>,
    /// Physical table name
    pub table: String,
    /// Alias for the base table; the table name itself when absent
    pub alias: Option<String>,
    /// `col` or `qualifier.col` entries; empty means all base-table columns
    pub select_fields: Option<Vec<String>>,
    pub filters: Option<Vec<Search>>,
    pub joins: Option<Vec<JoinRequest>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// `col` or `qualifier.col`
    pub order_by: Option<String>,
    pub order_direction: Option<OrderDirection>,
    pub distinct: bool,
    pub pretty: bool,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            config_id: None,
            direct_config: None,
            table: String::new(),
            alias: None,
            select_fields: None,
            filters: None,
            joins: None,
            limit: None,
            offset: None,
            order_by: None,
            order_direction: None,
            distinct: false,
            pretty: false,
        }
    }
}

impl QueryRequest {
    /// Alias of the base table if provided, otherwise the table name
    pub fn effective_alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    pub fn filters(&self) -> &[Search] {
        self.filters.as_deref().unwrap_or(&[])
    }

    pub fn joins(&self) -> &[JoinRequest] {
        self.joins.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_request() {
        let request: QueryRequest = serde_json::from_str(
            r#"{
                "configId": "abc",
                "table": "user_table",
                "alias": "u",
                "selectFields": ["u.id", "name"],
                "filters": [
                    {"column": "varchar_col", "value": "sam", "filterOperator": "LIKE"}
                ],
                "orderBy": "u.id",
                "orderDirection": "DESC",
                "distinct": true
            }"#,
        )
        .unwrap();

        assert_eq!(request.config_id.as_deref(), Some("abc"));
        assert_eq!(request.effective_alias(), "u");
        assert_eq!(request.filters().len(), 1);
        assert_eq!(request.filters()[0].filter_operator, FilterOperator::Like);
        assert_eq!(request.filters()[0].logical_operator, LogicalOperator::And);
        assert_eq!(request.order_direction, Some(OrderDirection::Desc));
        assert!(request.distinct);
        assert!(!request.pretty);
    }

    #[test]
    fn effective_alias_falls_back_to_table() {
        let request = QueryRequest {
            table: "orders".into(),
            ..Default::default()
        };
        assert_eq!(request.effective_alias(), "orders");
    }

    #[test]
    fn direct_key_joins_all_fields() {
        let descriptor = DatabaseDescriptor {
            id: None,
            name: None,
            db_type: "POSTGRES".into(),
            host: "localhost".into(),
            port: 5432,
            username: "app".into(),
            password: "secret".into(),
            database: "orders".into(),
            schema: None,
        };

        assert_eq!(
            descriptor.direct_key(),
            "POSTGRES::localhost::5432::orders::app::secret::"
        );
        assert_eq!(descriptor.cache_key(), descriptor.direct_key());
    }

    #[test]
    fn direct_config_requires_all_fields() {
        let config = DirectDatabaseConfig {
            db_type: Some("POSTGRES".into()),
            host: Some("localhost".into()),
            ..Default::default()
        };

        let err = config.to_descriptor().unwrap_err();
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn rejects_unknown_db_type() {
        assert!(SqlDialect::from_db_type("oracle").is_err());
        assert_eq!(
            SqlDialect::from_db_type("postgres").unwrap(),
            SqlDialect::Postgres
        );
        assert_eq!(SqlDialect::from_db_type("MySQL").unwrap(), SqlDialect::MySql);
    }

    #[test]
    fn schema_lookup_is_case_insensitive() {
        let schema = TableSchema {
            table: "Users".into(),
            columns: vec![ColumnInfo {
                name: "Email".into(),
                sql_type: SqlType::Varchar,
                type_name: "character varying".into(),
            }],
        };

        assert!(schema.contains("email"));
        assert!(schema.contains("EMAIL"));
        assert!(!schema.contains("missing"));
    }
}
