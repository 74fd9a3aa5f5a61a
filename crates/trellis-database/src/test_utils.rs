//! Test utilities for metadata store tests
//!
//! The gateway's own store is dialect-neutral, so tests run against an
//! in-memory SQLite database with the full migration set applied.

use crate::DbConnection;
use sea_orm::Database;
use std::sync::Arc;
use trellis_migrations::{Migrator, MigratorTrait};

/// In-memory test database with migrations applied
pub struct TestDatabase {
    pub db: Arc<DbConnection>,
}

impl TestDatabase {
    pub async fn new() -> anyhow::Result<Self> {
        let db = Database::connect("sqlite::memory:").await?;

        Migrator::up(&db, None).await?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get the database connection as Arc
    pub fn connection_arc(&self) -> Arc<DbConnection> {
        Arc::clone(&self.db)
    }
}
