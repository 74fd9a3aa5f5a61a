//! Request orchestration: resolve the backend context, resolve and cache the
//! table schema, assemble the statement, execute, and hand results back.

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use trellis_query::{
    assemble_count, assemble_delete, assemble_select, DescriptorStore, QueryContext, QueryError,
    QueryRequest, Result, RowStream, TableSchema,
};

use crate::registry::{share_error, ContextRegistry};

/// Cached schemas across all `(descriptor, table)` pairs
const MAX_SCHEMAS: u64 = 1000;

/// Write-age after which a cached schema is re-introspected
const SCHEMA_TTL: Duration = Duration::from_secs(10 * 60);

/// The gateway's execution pipeline, shared by all requests
pub struct FetchEngine {
    store: Arc<dyn DescriptorStore>,
    registry: Arc<ContextRegistry>,
    schemas: Cache<String, Arc<TableSchema>>,
}

impl FetchEngine {
    pub fn new(store: Arc<dyn DescriptorStore>, registry: Arc<ContextRegistry>) -> Self {
        Self {
            store,
            registry,
            schemas: Cache::builder()
                .max_capacity(MAX_SCHEMAS)
                .time_to_live(SCHEMA_TTL)
                .build(),
        }
    }

    /// Install one context per stored descriptor. Failures are logged and
    /// skipped so a dead backend cannot block startup.
    pub async fn preload(&self) {
        info!("Preloading execution contexts from stored configs");

        let descriptors = match self.store.list_all().await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                error!("Could not list configs for preload: {}", e);
                return;
            }
        };

        let mut loaded = 0usize;
        for descriptor in &descriptors {
            match self.registry.install(descriptor).await {
                Ok(_) => {
                    loaded += 1;
                    info!("Cached context for config ID: {}", descriptor.cache_key());
                }
                Err(e) => {
                    error!(
                        "Failed to create context for config ID {}: {}",
                        descriptor.cache_key(),
                        e
                    );
                }
            }
        }

        info!("Preloaded {}/{} contexts", loaded, descriptors.len());
    }

    /// Stream rows for a request
    pub async fn fetch_data(&self, request: &QueryRequest) -> Result<RowStream> {
        let (key, context) = self.resolve_context(request).await?;
        let schema = self.resolve_schema(&key, &context, &request.table).await?;

        let statement = assemble_select(request, &schema, context.dialect())?;
        debug!("Assembled query: {}", statement.sql);

        context.query_stream(statement).await
    }

    /// Count rows matching a request
    pub async fn fetch_count(&self, request: &QueryRequest) -> Result<i64> {
        let (key, context) = self.resolve_context(request).await?;
        let schema = self.resolve_schema(&key, &context, &request.table).await?;

        let statement = assemble_count(request, &schema, context.dialect())?;
        debug!("Assembled count: {}", statement.sql);

        context.query_count(statement).await
    }

    /// Delete rows matching a request's predicate; the predicate is required
    pub async fn delete_data(&self, request: &QueryRequest) -> Result<u64> {
        let (key, context) = self.resolve_context(request).await?;
        let schema = self.resolve_schema(&key, &context, &request.table).await?;

        let statement = assemble_delete(request, &schema, context.dialect())?;
        debug!("Assembled delete: {}", statement.sql);

        context.execute(statement).await
    }

    /// Resolve the ordered `{column: declared_type}` map for a table
    pub async fn table_schema(&self, request: &QueryRequest) -> Result<Arc<TableSchema>> {
        let (key, context) = self.resolve_context(request).await?;
        self.resolve_schema(&key, &context, &request.table).await
    }

    /// Resolve the execution context for a request.
    ///
    /// `direct_config` wins when both it and `config_id` are present.
    async fn resolve_context(
        &self,
        request: &QueryRequest,
    ) -> Result<(String, Arc<dyn QueryContext>)> {
        if request.table.trim().is_empty() {
            return Err(QueryError::InvalidArgument(
                "Request is missing a table name".to_string(),
            ));
        }

        if let Some(direct) = &request.direct_config {
            let descriptor = direct.to_descriptor()?;
            let key = descriptor.cache_key();
            let context = self.registry.get_or_connect(&descriptor).await?;
            return Ok((key, context));
        }

        if let Some(id) = &request.config_id {
            let descriptor = self
                .store
                .get_by_id(id)
                .await?
                .ok_or_else(|| QueryError::NotFound(format!("Config not found: {}", id)))?;
            let context = self.registry.get_or_connect(&descriptor).await?;
            return Ok((id.clone(), context));
        }

        Err(QueryError::InvalidArgument(
            "Either configId or directConfig must be provided".to_string(),
        ))
    }

    /// Schema lookup with `(descriptor, table)` caching
    async fn resolve_schema(
        &self,
        descriptor_key: &str,
        context: &Arc<dyn QueryContext>,
        table: &str,
    ) -> Result<Arc<TableSchema>> {
        let cache_key = format!("{}:{}", descriptor_key, table.to_lowercase());
        let context = context.clone();
        let table = table.to_string();

        self.schemas
            .try_get_with(cache_key, async move {
                context.table_schema(&table).await.map(Arc::new)
            })
            .await
            .map_err(|e| share_error(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use trellis_query::{DatabaseDescriptor, DirectDatabaseConfig};

    struct EmptyStore;

    #[async_trait]
    impl DescriptorStore for EmptyStore {
        async fn get_by_id(&self, _id: &str) -> Result<Option<DatabaseDescriptor>> {
            Ok(None)
        }

        async fn list_all(&self) -> Result<Vec<DatabaseDescriptor>> {
            Ok(Vec::new())
        }
    }

    fn engine() -> FetchEngine {
        FetchEngine::new(Arc::new(EmptyStore), Arc::new(ContextRegistry::new()))
    }

    fn direct_config() -> DirectDatabaseConfig {
        DirectDatabaseConfig {
            db_type: Some("POSTGRES".into()),
            host: Some("127.0.0.1".into()),
            // Nothing listens here; resolution fails at connect time
            port: Some(1),
            username: Some("app".into()),
            password: Some("secret".into()),
            database: Some("orders".into()),
            schema: None,
        }
    }

    #[tokio::test]
    async fn missing_config_source_is_invalid_argument() {
        let request = QueryRequest {
            table: "users".into(),
            ..Default::default()
        };

        let err = engine().fetch_count(&request).await.unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
        assert!(err.to_string().contains("configId or directConfig"));
    }

    #[tokio::test]
    async fn missing_table_is_invalid_argument() {
        let request = QueryRequest {
            config_id: Some("cfg".into()),
            ..Default::default()
        };

        let err = engine().fetch_count(&request).await.unwrap_err();
        assert!(err.to_string().contains("table"));
    }

    #[tokio::test]
    async fn unknown_config_id_is_not_found() {
        let request = QueryRequest {
            config_id: Some("missing".into()),
            table: "users".into(),
            ..Default::default()
        };

        let err = engine().fetch_count(&request).await.unwrap_err();
        assert!(matches!(err, QueryError::NotFound(_)));
    }

    #[tokio::test]
    async fn direct_config_wins_over_config_id() {
        // The store knows no ids, so taking the config_id path would yield
        // NotFound; the direct path reaches the (refused) connection instead
        let request = QueryRequest {
            config_id: Some("missing".into()),
            direct_config: Some(direct_config()),
            table: "users".into(),
            ..Default::default()
        };

        let err = engine().fetch_count(&request).await.unwrap_err();
        assert!(matches!(err, QueryError::Backend(_)));
    }

    #[tokio::test]
    async fn incomplete_direct_config_is_invalid_argument() {
        let mut direct = direct_config();
        direct.username = None;

        let request = QueryRequest {
            direct_config: Some(direct),
            table: "users".into(),
            ..Default::default()
        };

        let err = engine().fetch_count(&request).await.unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
        assert!(err.to_string().contains("username"));
    }
}
