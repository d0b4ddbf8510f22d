//! Topic tracker binary: fair long-running collection over a query list.

use clap::Parser;
use tokio::sync::watch;

use sway_analytics::config::TrackerConfig;
use sway_analytics::query::Query;
use sway_analytics::tracker::TopicTracker;
use sway_analytics::upstream::{AppSecrets, UpstreamClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = TrackerConfig::parse();

    let raw = std::fs::read_to_string(&config.topics_file)?;
    let queries: Vec<Query> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(Query::parse)
        .collect::<Result<_, _>>()?;
    anyhow::ensure!(!queries.is_empty(), "no queries in topics file");
    tracing::info!(topics = queries.len(), "tracking topics");

    // Topic tracking runs application-only; user contexts stay reserved
    // for the on-demand path.
    let secrets = AppSecrets::from_env()?;
    let client = UpstreamClient::connect(secrets, None);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut tracker = TopicTracker::new(client, config.archive_root.clone());
    tracker
        .collect(&queries, config.evenness, &config.lang, shutdown_rx)
        .await?;
    tracing::info!("end of line");
    Ok(())
}
