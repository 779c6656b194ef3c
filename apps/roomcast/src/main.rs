mod broadcast;
mod config;
mod heartbeat;
mod hub;
mod registry;
mod scheduler;
mod session;
mod storage;
mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::{Cli, Config},
    hub::HubDirectory,
    storage::RedisWakeStore,
    ws::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let config = Config::from(Cli::parse());
    info!(
        port = config.port,
        redis_url = %config.redis_url,
        auto_close = config.auto_close,
        sweep_interval_ms = config.sweep_interval.as_millis() as u64,
        liveness_timeout_ms = config.liveness_timeout.as_millis() as u64,
        "starting roomcast hub"
    );

    let store = RedisWakeStore::connect(&config.redis_url)
        .await
        .context("failed to connect to redis")?;

    let port = config.port;
    let directory = HubDirectory::new(config, Arc::new(store));
    let app = ws::router(AppState { directory })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("roomcast listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    Ok(())
}
