//! Beacon live build-event server.

use anyhow::Context;
use beacon_config::{HubConfig, load_hub_config};
use beacon_db::{PgBuildStore, PgNotificationSource, create_pool, run_migrations};
use beacon_hub::DistributionHub;
use beacon_server::{AppState, routes};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "beacon-server")]
#[command(about = "Live build-event distribution server", long_about = None)]
struct Cli {
    /// Path to the service configuration
    #[arg(long, env = "BEACON_CONFIG")]
    config: Option<PathBuf>,

    /// Database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Address to listen on (overrides the config file)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_hub_config(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => HubConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    let database_url = cli
        .database_url
        .or_else(|| config.database_url.clone())
        .context("no database URL: pass --database-url or set DATABASE_URL")?;

    info!("Connecting to database...");
    let pool = create_pool(&database_url).await?;
    run_migrations(&pool).await?;
    info!("Database connected");

    let hub = DistributionHub::new(Arc::new(PgBuildStore::new(pool.clone())));
    let handle = hub.start(Arc::new(PgNotificationSource::new(pool)), &config);
    let state = AppState::new(hub, config.console.clone(), handle.watch_states());

    let app = routes::router(state).layer(
        ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        ),
    );

    info!(bind = %config.server.bind, "Starting server");
    let listener = TcpListener::bind(config.server.bind.as_str()).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    handle.shutdown().await;
    Ok(())
}
