//! Sea-orm backed descriptor store.

use async_trait::async_trait;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use trellis_database::DbConnection;
use trellis_entities::database_configs;
use trellis_query::{DatabaseDescriptor, DescriptorStore, QueryError};

/// Persistent store for backend descriptors, keyed by id
pub struct SeaOrmDescriptorStore {
    db: Arc<DbConnection>,
}

impl SeaOrmDescriptorStore {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn find_all(&self) -> Result<Vec<database_configs::Model>, sea_orm::DbErr> {
        database_configs::Entity::find()
            .order_by_asc(database_configs::Column::Name)
            .all(self.db.as_ref())
            .await
    }

    pub async fn find_by_id(
        &self,
        id: &str,
    ) -> Result<Option<database_configs::Model>, sea_orm::DbErr> {
        database_configs::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await
    }

    pub async fn find_by_name(
        &self,
        name: &str,
    ) -> Result<Option<database_configs::Model>, sea_orm::DbErr> {
        database_configs::Entity::find()
            .filter(database_configs::Column::Name.eq(name))
            .one(self.db.as_ref())
            .await
    }

    pub async fn insert(
        &self,
        model: database_configs::ActiveModel,
    ) -> Result<database_configs::Model, sea_orm::DbErr> {
        model.insert(self.db.as_ref()).await
    }

    pub async fn update(
        &self,
        model: database_configs::ActiveModel,
    ) -> Result<database_configs::Model, sea_orm::DbErr> {
        model.update(self.db.as_ref()).await
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<u64, sea_orm::DbErr> {
        let result = database_configs::Entity::delete_by_id(id)
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}

/// Convert a stored model into the runtime descriptor shape
pub fn descriptor_from_model(model: &database_configs::Model) -> DatabaseDescriptor {
    DatabaseDescriptor {
        id: Some(model.id.clone()),
        name: Some(model.name.clone()),
        db_type: model.db_type.clone(),
        host: model.host.clone(),
        port: model.port as u16,
        username: model.username.clone(),
        password: model.password.clone(),
        database: model.database.clone(),
        schema: model.db_schema.clone(),
    }
}

#[async_trait]
impl DescriptorStore for SeaOrmDescriptorStore {
    async fn get_by_id(&self, id: &str) -> trellis_query::Result<Option<DatabaseDescriptor>> {
        let model = self
            .find_by_id(id)
            .await
            .map_err(|e| QueryError::Internal(format!("Config store error: {}", e)))?;

        Ok(model.as_ref().map(descriptor_from_model))
    }

    async fn list_all(&self) -> trellis_query::Result<Vec<DatabaseDescriptor>> {
        let models = self
            .find_all()
            .await
            .map_err(|e| QueryError::Internal(format!("Config store error: {}", e)))?;

        Ok(models.iter().map(descriptor_from_model).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::ActiveValue::Set;
    use trellis_database::test_utils::TestDatabase;

    fn active_model(id: &str, name: &str) -> database_configs::ActiveModel {
        database_configs::ActiveModel {
            id: Set(id.to_string()),
            name: Set(name.to_string()),
            db_type: Set("POSTGRES".to_string()),
            host: Set("localhost".to_string()),
            port: Set(5432),
            username: Set("app".to_string()),
            password: Set("secret".to_string()),
            database: Set("orders".to_string()),
            db_schema: Set(None),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn store_round_trips_descriptors() -> anyhow::Result<()> {
        let test_db = TestDatabase::new().await?;
        let store = SeaOrmDescriptorStore::new(test_db.connection_arc());

        store.insert(active_model("cfg-1", "analytics")).await?;
        store.insert(active_model("cfg-2", "billing")).await?;

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name.as_deref(), Some("analytics"));

        let by_id = store.get_by_id("cfg-2").await.unwrap().unwrap();
        assert_eq!(by_id.database, "orders");
        assert_eq!(by_id.port, 5432);

        assert!(store.get_by_id("missing").await.unwrap().is_none());

        let deleted = store.delete_by_id("cfg-1").await?;
        assert_eq!(deleted, 1);
        assert_eq!(store.find_all().await?.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn find_by_name_matches_exactly() -> anyhow::Result<()> {
        let test_db = TestDatabase::new().await?;
        let store = SeaOrmDescriptorStore::new(test_db.connection_arc());

        store.insert(active_model("cfg-1", "analytics")).await?;

        assert!(store.find_by_name("analytics").await?.is_some());
        assert!(store.find_by_name("Analytics").await?.is_none());

        Ok(())
    }
}
