use crate::error::Result;
use crate::statement::Statement;
use crate::types::{DatabaseDescriptor, SqlDialect, TableSchema};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

pub use crate::shape::JsonRow;

/// Stream of shaped result rows, delivered in backend order
pub type RowStream = Pin<Box<dyn Stream<Item = Result<JsonRow>> + Send>>;

/// A live SQL execution context bound to one backend descriptor.
///
/// Implementations own the physical connection state and are shared through
/// the context registry; all methods take `&self` so one context can serve
/// parallel requests.
#[async_trait]
pub trait QueryContext: Send + Sync + std::fmt::Debug {
    /// Dialect statements must be assembled for
    fn dialect(&self) -> SqlDialect;

    /// Resolve a table's column map, case-insensitively.
    ///
    /// Fails with `NotFound` when the table is absent from backend metadata.
    async fn table_schema(&self, table: &str) -> Result<TableSchema>;

    /// Execute a SELECT and stream shaped rows
    async fn query_stream(&self, statement: Statement) -> Result<RowStream>;

    /// Execute a scalar query (COUNT) and return the single value
    async fn query_count(&self, statement: Statement) -> Result<i64>;

    /// Execute a statement and return the number of affected rows
    async fn execute(&self, statement: Statement) -> Result<u64>;

    /// Cheap liveness probe used when verifying descriptors
    async fn ping(&self) -> Result<()>;

    /// Close the connection gracefully
    async fn close(&self) -> Result<()>;
}

/// The slice of the configuration store the execution pipeline consumes
#[async_trait]
pub trait DescriptorStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<DatabaseDescriptor>>;

    async fn list_all(&self) -> Result<Vec<DatabaseDescriptor>>;
}
