//! Context registry: one live execution context per backend descriptor.
//!
//! Contexts are cached by descriptor id (or the deterministic direct key),
//! opened lazily with single-flight semantics so parallel first-touches for
//! the same key produce exactly one connection, and evicted by capacity and
//! access-idle age. Descriptor mutations install or evict entries through
//! the config service.

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use trellis_query::{DatabaseDescriptor, QueryContext, QueryError, Result, SqlDialect};
use trellis_query_mysql::MySqlContext;
use trellis_query_postgres::PostgresContext;

/// Cached contexts across all descriptors
const MAX_CONTEXTS: u64 = 50;

/// Idle time after which an unused context is dropped
const CONTEXT_IDLE: Duration = Duration::from_secs(15 * 60);

/// Open a fresh execution context for a descriptor
pub async fn connect_context(
    descriptor: &DatabaseDescriptor,
) -> Result<Arc<dyn QueryContext>> {
    let dialect = descriptor.dialect()?;
    info!(
        "Opening {} context for {}",
        dialect,
        descriptor.display_url()?
    );

    match dialect {
        SqlDialect::Postgres => Ok(Arc::new(PostgresContext::connect(descriptor).await?)),
        SqlDialect::MySql => Ok(Arc::new(MySqlContext::connect(descriptor).await?)),
    }
}

/// Open a disposable connection to prove a descriptor works, then drop it
pub async fn verify_descriptor(descriptor: &DatabaseDescriptor) -> Result<()> {
    let context = connect_context(descriptor).await?;
    context.ping().await?;
    context.close().await
}

pub struct ContextRegistry {
    contexts: Cache<String, Arc<dyn QueryContext>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self {
            contexts: Cache::builder()
                .max_capacity(MAX_CONTEXTS)
                .time_to_idle(CONTEXT_IDLE)
                .build(),
        }
    }

    /// Return the cached context for a descriptor, opening it on first use.
    ///
    /// Parallel callers for the same key share one connection attempt.
    pub async fn get_or_connect(
        &self,
        descriptor: &DatabaseDescriptor,
    ) -> Result<Arc<dyn QueryContext>> {
        let key = descriptor.cache_key();
        let descriptor = descriptor.clone();

        self.contexts
            .try_get_with(key, async move { connect_context(&descriptor).await })
            .await
            .map_err(|e| share_error(&e))
    }

    /// Open a context and (re)install it, replacing any cached one
    pub async fn install(
        &self,
        descriptor: &DatabaseDescriptor,
    ) -> Result<Arc<dyn QueryContext>> {
        let key = descriptor.cache_key();
        let context = connect_context(descriptor).await?;

        self.contexts.insert(key.clone(), context.clone()).await;
        debug!("Cached context for key: {}", key);

        Ok(context)
    }

    /// Drop the cached context for a key, if any
    pub async fn invalidate(&self, key: &str) {
        self.contexts.invalidate(key).await;
        debug!("Evicted context for key: {}", key);
    }

    /// Whether a context is currently cached for a key
    pub fn contains(&self, key: &str) -> bool {
        self.contexts.contains_key(key)
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// moka shares initialization errors as `Arc<QueryError>`; rebuild an owned
/// error carrying the same kind and message
pub(crate) fn share_error(e: &Arc<QueryError>) -> QueryError {
    match e.as_ref() {
        QueryError::InvalidArgument(m) => QueryError::InvalidArgument(m.clone()),
        QueryError::NotFound(m) => QueryError::NotFound(m.clone()),
        QueryError::Backend(m) => QueryError::Backend(m.clone()),
        QueryError::Conflict(m) => QueryError::Conflict(m.clone()),
        QueryError::Cancelled(m) => QueryError::Cancelled(m.clone()),
        QueryError::Internal(m) => QueryError::Internal(m.clone()),
    }
}
