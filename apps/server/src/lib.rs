//! Helix Server
//!
//! HTTP surface over the `helix-training` engine: dataset upload, job
//! submission and progress polling, and model blueprint building.

pub mod catalog;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod response;
pub mod routes;
pub mod state;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};

pub use config::Config;
pub use routes::router;
pub use state::AppState;

/// Bind, serve until Ctrl-C, then wait for in-flight jobs.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = AppState::from_config(&config);
    let app = router(state.clone(), &config.server);

    let listener = TcpListener::bind(config.server.address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.address))?;
    info!(address = %listener.local_addr()?, "Helix server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!(active = state.supervisor.active_jobs().await, "Shutting down");
    state.supervisor.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
