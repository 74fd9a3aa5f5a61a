//! Trellis CLI - entrypoint for the query gateway server

mod commands;

use clap::{Parser, Subcommand};
use commands::ServeCommand;
use tracing_subscriber::layer::SubscriberExt;

#[derive(Parser)]
#[command(author, version, about = "Trellis dynamic relational query gateway", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "TRELLIS_LOG_LEVEL", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve(ServeCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // If RUST_LOG is set it takes full control; otherwise run the trellis
    // crates at the requested level and keep noisy dependencies at warn
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .expect("Invalid RUST_LOG environment variable")
    } else {
        tracing_subscriber::EnvFilter::new(format!(
            "trellis_cli={level},\
             trellis_core={level},\
             trellis_database={level},\
             trellis_migrations={level},\
             trellis_query={level},\
             trellis_query_postgres={level},\
             trellis_query_mysql={level},\
             trellis_configs={level},\
             trellis_engine={level},\
             sqlx=warn,\
             sea_orm=warn,\
             tokio_postgres=warn,\
             hyper=warn,\
             tower=warn",
            level = cli.log_level
        ))
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_target(false));
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global default subscriber");

    match cli.command {
        Commands::Serve(serve_cmd) => serve_cmd.execute().await,
    }
}
