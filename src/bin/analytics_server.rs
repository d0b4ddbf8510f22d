//! Analytics server binary: HTTP front door + dispatcher + worker pool.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use sway_analytics::analysis::{CollectiveInfluenceRanker, OnDemandAnalysis};
use sway_analytics::api::{create_router, AppState, QueryLog};
use sway_analytics::config::ServerConfig;
use sway_analytics::dispatcher::{Dispatcher, DispatcherConfig};
use sway_analytics::upstream::{AppSecrets, CredentialPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServerConfig::parse();

    let query_log = Arc::new(QueryLog::new(config.query_log.clone()));
    query_log.launch_banner().await;

    let secrets = AppSecrets::from_env()?;
    let credentials = CredentialPool::load(&config.credentials_file, secrets)?;
    tracing::info!(accounts = credentials.len(), "credential pool loaded");

    let mut analysis = OnDemandAnalysis::new(config.archive_root.clone());
    analysis.radius = config.radius;
    analysis.max_pages = config.max_pages;
    analysis.lang = config.lang.clone();

    let mut dispatcher_config = DispatcherConfig::new(analysis);
    if let Some(workers) = config.workers {
        dispatcher_config.workers = workers;
    }
    tracing::info!(workers = dispatcher_config.workers, "starting dispatcher");
    let dispatcher = Dispatcher::spawn(
        dispatcher_config,
        credentials,
        Arc::new(CollectiveInfluenceRanker),
    );

    let state = AppState {
        dispatcher,
        query_log,
        slow_threshold: Duration::from_secs_f64(config.slow_query_secs),
    };
    let app = create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "analytics server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
