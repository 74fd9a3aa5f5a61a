//! Engine plugin: registers the context registry and fetch engine, kicks off
//! the startup preload, and wires the `/query` routes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use trellis_core::plugin::{
    PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext, TrellisPlugin,
};
use trellis_query::DescriptorStore;
use utoipa::OpenApi as OpenApiTrait;

use crate::engine::FetchEngine;
use crate::handler::{configure_routes, QueryApiDoc, QueryState};
use crate::registry::ContextRegistry;

pub struct EnginePlugin;

impl TrellisPlugin for EnginePlugin {
    fn name(&self) -> &'static str {
        "engine"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let store = context.require_service::<dyn DescriptorStore>();

            let registry = Arc::new(ContextRegistry::new());
            let engine = Arc::new(FetchEngine::new(store, registry.clone()));

            context.register_service(registry);
            context.register_service(engine.clone());

            // Preload runs in the background; failures are logged per
            // descriptor and never abort startup
            tokio::spawn(async move { engine.preload().await });

            tracing::debug!("Engine plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let engine = context.require_service::<FetchEngine>();
        let state = Arc::new(QueryState { engine });

        Some(PluginRoutes::new(configure_routes().with_state(state)))
    }

    fn openapi_schema(&self) -> Option<utoipa::openapi::OpenApi> {
        Some(QueryApiDoc::openapi())
    }
}
