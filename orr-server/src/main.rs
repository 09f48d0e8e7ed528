//! OpenRaceReplay Server
//!
//! Builds replay bundles from session sources and serves them over the
//! chunked delivery and playback API.

use anyhow::Result;
use orr_server::{api, cache, state};
use std::net::SocketAddr;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting OpenRaceReplay Server");

    // Cache directory: ORR_CACHE_DIR overrides the platform default
    let cache_dir = std::env::var("ORR_CACHE_DIR")
        .map(Into::into)
        .unwrap_or_else(|_| cache::ReplayCache::default_dir());
    let cache = cache::ReplayCache::open(&cache_dir)?;
    info!("Replay cache at {}", cache_dir.display());

    // Create application state
    let state = state::AppState::new(cache);

    // Build the router
    let app = api::create_router(state.clone());

    // Register previously built replays in the background
    tokio::spawn(cache::hydrate(state.clone()));

    // Start server
    let port = std::env::var("ORR_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9210u16);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
