use async_trait::async_trait;
use sea_orm::ActiveValue::Set;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use trellis_engine::registry::{verify_descriptor, ContextRegistry};
use trellis_entities::database_configs;
use trellis_query::{DatabaseDescriptor, SqlDialect};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::{descriptor_from_model, SeaOrmDescriptorStore};

#[derive(Error, Debug)]
pub enum ConfigServiceError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Missing required database configuration fields: {details}")]
    Validation { details: String },

    #[error("A config with this name already exists")]
    Conflict,

    #[error("Config not found: {id}")]
    NotFound { id: String },

    #[error("Database connection failed: {0}")]
    Connection(String),
}

/// Request body for creating or updating a descriptor
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfigPayload {
    pub name: Option<String>,
    pub db_type: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
}

/// Verifies a descriptor can actually open a connection before it is saved
#[async_trait]
pub trait ConnectionVerifier: Send + Sync {
    async fn verify(&self, descriptor: &DatabaseDescriptor) -> Result<(), trellis_query::QueryError>;
}

/// Default verifier: opens a disposable connection through the backend factory
pub struct DisposableConnectionVerifier;

#[async_trait]
impl ConnectionVerifier for DisposableConnectionVerifier {
    async fn verify(
        &self,
        descriptor: &DatabaseDescriptor,
    ) -> Result<(), trellis_query::QueryError> {
        verify_descriptor(descriptor).await
    }
}

/// Descriptor lifecycle: validation, uniqueness, connection verification and
/// context-cache maintenance around every mutation
pub struct ConfigService {
    store: Arc<SeaOrmDescriptorStore>,
    registry: Arc<ContextRegistry>,
    verifier: Arc<dyn ConnectionVerifier>,
}

impl ConfigService {
    pub fn new(store: Arc<SeaOrmDescriptorStore>, registry: Arc<ContextRegistry>) -> Self {
        Self {
            store,
            registry,
            verifier: Arc::new(DisposableConnectionVerifier),
        }
    }

    /// Replace the connection verifier (tests)
    pub fn with_verifier(mut self, verifier: Arc<dyn ConnectionVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub async fn find_all(&self) -> Result<Vec<database_configs::Model>, ConfigServiceError> {
        Ok(self.store.find_all().await?)
    }

    pub async fn find_by_id(
        &self,
        id: &str,
    ) -> Result<Option<database_configs::Model>, ConfigServiceError> {
        Ok(self.store.find_by_id(id).await?)
    }

    pub async fn create(
        &self,
        payload: DatabaseConfigPayload,
    ) -> Result<database_configs::Model, ConfigServiceError> {
        let (name, descriptor) = validate(&payload)?;

        if self.store.find_by_name(&name).await?.is_some() {
            return Err(ConfigServiceError::Conflict);
        }

        self.verify(&descriptor, &name).await?;

        let model = self
            .store
            .insert(to_active_model(Uuid::new_v4().to_string(), &name, &descriptor))
            .await?;

        self.install(&model).await;
        info!("Created database config '{}' ({})", model.name, model.id);

        Ok(model)
    }

    pub async fn update(
        &self,
        id: &str,
        payload: DatabaseConfigPayload,
    ) -> Result<database_configs::Model, ConfigServiceError> {
        let (name, descriptor) = validate(&payload)?;

        if self.store.find_by_id(id).await?.is_none() {
            return Err(ConfigServiceError::NotFound { id: id.to_string() });
        }

        // The name may stay the same, but may not collide with another id
        if let Some(existing) = self.store.find_by_name(&name).await? {
            if existing.id != id {
                return Err(ConfigServiceError::Conflict);
            }
        }

        self.verify(&descriptor, &name).await?;

        let model = self
            .store
            .update(to_active_model(id.to_string(), &name, &descriptor))
            .await?;

        self.install(&model).await;
        info!("Updated database config '{}' ({})", model.name, model.id);

        Ok(model)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ConfigServiceError> {
        let deleted = self.store.delete_by_id(id).await?;
        if deleted == 0 {
            return Err(ConfigServiceError::NotFound { id: id.to_string() });
        }

        self.registry.invalidate(id).await;
        info!("Deleted database config {} and evicted its context", id);

        Ok(())
    }

    async fn verify(
        &self,
        descriptor: &DatabaseDescriptor,
        name: &str,
    ) -> Result<(), ConfigServiceError> {
        match self.verifier.verify(descriptor).await {
            Ok(()) => {
                info!("Database connection verified for '{}'", name);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to connect to DB [{}]: {}", name, e);
                Err(ConfigServiceError::Connection(e.to_string()))
            }
        }
    }

    /// Refresh the cached context after a successful save. A failure here is
    /// not fatal: the context is opened lazily on first use.
    async fn install(&self, model: &database_configs::Model) {
        let descriptor = descriptor_from_model(model);
        if let Err(e) = self.registry.install(&descriptor).await {
            warn!(
                "Could not cache context for config {}: {}",
                model.id, e
            );
        }
    }
}

fn validate(
    payload: &DatabaseConfigPayload,
) -> Result<(String, DatabaseDescriptor), ConfigServiceError> {
    let mut missing = Vec::new();

    let name = non_blank(&payload.name, "name", &mut missing);
    let db_type = non_blank(&payload.db_type, "dbType", &mut missing);
    let host = non_blank(&payload.host, "host", &mut missing);
    let username = non_blank(&payload.username, "username", &mut missing);
    let password = non_blank(&payload.password, "password", &mut missing);
    let database = non_blank(&payload.database, "database", &mut missing);
    if payload.port.is_none() {
        missing.push("port");
    }

    if !missing.is_empty() {
        return Err(ConfigServiceError::Validation {
            details: missing.join(", "),
        });
    }

    let db_type = db_type.unwrap();
    SqlDialect::from_db_type(&db_type).map_err(|e| ConfigServiceError::Validation {
        details: e.to_string(),
    })?;

    let descriptor = DatabaseDescriptor {
        id: None,
        name: name.clone(),
        db_type,
        host: host.unwrap(),
        port: payload.port.unwrap(),
        username: username.unwrap(),
        password: password.unwrap(),
        database: database.unwrap(),
        schema: payload.schema.clone(),
    };

    Ok((name.unwrap(), descriptor))
}

fn non_blank(
    value: &Option<String>,
    field: &'static str,
    missing: &mut Vec<&'static str>,
) -> Option<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Some(v.clone()),
        _ => {
            missing.push(field);
            None
        }
    }
}

fn to_active_model(
    id: String,
    name: &str,
    descriptor: &DatabaseDescriptor,
) -> database_configs::ActiveModel {
    database_configs::ActiveModel {
        id: Set(id),
        name: Set(name.to_string()),
        db_type: Set(descriptor.db_type.clone()),
        host: Set(descriptor.host.clone()),
        port: Set(descriptor.port as i32),
        username: Set(descriptor.username.clone()),
        password: Set(descriptor.password.clone()),
        database: Set(descriptor.database.clone()),
        db_schema: Set(descriptor.schema.clone()),
        ..Default::default()
    }
}
