use std::sync::Arc;

use clap::Parser;
use floodwatch::api;
use floodwatch::app::AppState;
use floodwatch::config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Load configuration and evacuation sites
    let config = Config::parse();
    let sites = config.load_sites()?;
    info!(count = sites.len(), "evacuation sites loaded");

    // 2. Build application state
    let state = Arc::new(AppState::new(sites, config.lifecycle()));
    let eviction = state.spawn_idle_eviction(config.session_idle_ttl());

    // 3. Serve until Ctrl-C
    let app = api::router(state.clone());
    info!("API server running on http://{}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 4. Tear down sessions and status watches
    eviction.abort();
    state.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
