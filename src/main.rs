use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

mod api;
mod config;
mod live_scores;
mod models;

use api::AppState;
use config::Config;
use live_scores::{start_cache_sweeper, HttpScoreSource, ScoreSource, SessionManager, SnapshotCache};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let source: Arc<dyn ScoreSource> = Arc::new(HttpScoreSource::new(
        &config.upstream_url,
        config.upstream_timeout(),
    )?);
    info!("Score source: {} at {}", source.name(), config.upstream_url);

    let cache = SnapshotCache::new(source, config.cache_ttl());
    let _sweeper = start_cache_sweeper(cache.clone(), config.cache_evict_after());

    let session_config = config.session_config();
    info!(
        "Sessions poll every {:?}, heartbeat every {:?}, cache TTL {:?}",
        session_config.poll_interval,
        session_config.heartbeat_interval,
        cache.ttl()
    );

    // Flipped on Ctrl-C so open event streams end and the server can drain
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sessions = SessionManager::new(cache, session_config, shutdown_rx);

    let app = api::router(AppState { sessions });
    let addr: SocketAddr = config.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Live score feed listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested, closing event streams");
            shutdown_tx.send_replace(true);
        })
        .await?;

    info!("Server stopped");
    Ok(())
}
