//! Configs plugin: registers the descriptor store and wires the `/configs`
//! routes into the application.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use trellis_core::plugin::{
    PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext, TrellisPlugin,
};
use trellis_database::DbConnection;
use trellis_engine::registry::ContextRegistry;
use trellis_query::DescriptorStore;
use utoipa::OpenApi as OpenApiTrait;

use crate::handler::{configure_routes, ConfigsApiDoc, ConfigsState};
use crate::service::ConfigService;
use crate::store::SeaOrmDescriptorStore;

pub struct ConfigsPlugin;

impl TrellisPlugin for ConfigsPlugin {
    fn name(&self) -> &'static str {
        "configs"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DbConnection>();

            let store = Arc::new(SeaOrmDescriptorStore::new(db));
            context.register_service(store.clone());
            // The engine consumes the store through its narrow trait
            context.register_service::<dyn DescriptorStore>(store);

            tracing::debug!("Configs plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let store = context.require_service::<SeaOrmDescriptorStore>();
        let registry = context.require_service::<ContextRegistry>();

        let config_service = Arc::new(ConfigService::new(store, registry));
        let state = Arc::new(ConfigsState { config_service });

        Some(PluginRoutes::new(configure_routes().with_state(state)))
    }

    fn openapi_schema(&self) -> Option<utoipa::openapi::OpenApi> {
        Some(ConfigsApiDoc::openapi())
    }
}
