//! Service entry point: schedule extraction and calendar sync for the
//! Mosaic student portal.

mod calendar;
mod config;
mod scrape;
mod server;
mod tasks;
mod types;

use crate::config::Config;
use crate::types::AppState;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let config = Config::from_env();
    info!(
        bind = %config.bind_addr,
        webdriver = %config.webdriver_url,
        "starting schedsync"
    );

    let state = Arc::new(AppState::new(config));
    let router = server::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&state.config.bind_addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolves on Ctrl-C. In-flight imports run detached with no cancellation
/// primitive; shutting down abandons their browser sessions.
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
