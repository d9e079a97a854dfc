use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use rsshub_core::{
    duration::format_duration,
    feed::FeedFetcher,
    storage::{Database, SqliteStore},
    Aggregator, AppConfig, ControlServer,
};

/// Run the aggregator and its control endpoint until Ctrl+C
pub async fn run(config: &AppConfig) -> Result<()> {
    // Claim the control address first; a second instance stops here
    let server = ControlServer::bind(&config.control.addr).await?;

    let db = Database::new(config).await?;
    let store = Arc::new(SqliteStore::new(db));
    let fetcher = Arc::new(FeedFetcher::new(&config.fetch)?);

    let aggregator = Aggregator::new(
        store,
        fetcher,
        config.aggregator.interval,
        config.aggregator.workers,
    )?;

    let shutdown = CancellationToken::new();
    aggregator.start(&shutdown)?;

    let control = tokio::spawn(server.run(aggregator.clone(), shutdown.clone()));

    println!(
        "Fetching every {} with {} workers. Press Ctrl+C to stop.",
        format_duration(config.aggregator.interval),
        config.aggregator.workers
    );
    println!("  Control endpoint: {}", config.control.addr);

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    shutdown.cancel();
    aggregator.shutdown().await;
    control.await??;

    println!("Fetcher stopped.");
    Ok(())
}
