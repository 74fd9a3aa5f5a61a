use axum::routing::get;
use axum::Json;
use clap::Args;
use std::sync::Arc;
use tracing::info;
use trellis_core::plugin::PluginManager;
use trellis_database::DbConnection;

#[derive(Args)]
pub struct ServeCommand {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1:8080", env = "TRELLIS_ADDRESS")]
    pub address: String,

    /// Metadata database connection URL (descriptor store)
    #[arg(
        long,
        default_value = "sqlite://trellis.db?mode=rwc",
        env = "TRELLIS_DATABASE_URL"
    )]
    pub database_url: String,
}

impl ServeCommand {
    pub async fn execute(self) -> anyhow::Result<()> {
        info!("Initializing metadata database connection");
        let db = trellis_database::establish_connection(&self.database_url).await?;

        let mut manager = PluginManager::new();
        manager
            .service_context()
            .register_service::<DbConnection>(db);

        // Order matters: the engine requires the descriptor store
        manager.register_plugin(Box::new(trellis_configs::ConfigsPlugin));
        manager.register_plugin(Box::new(trellis_engine::EnginePlugin));

        manager.initialize_plugins().await?;

        let openapi = manager.get_unified_openapi("Trellis", env!("CARGO_PKG_VERSION"));
        let openapi = Arc::new(serde_json::to_value(&openapi)?);

        let app = manager.build_application()?.route(
            "/api/openapi.json",
            get(move || {
                let openapi = openapi.clone();
                async move { Json(openapi.as_ref().clone()) }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&self.address).await?;
        info!("Trellis server listening on {}", self.address);

        axum::serve(listener, app).await?;

        Ok(())
    }
}
