//! Meridian API server.

use anyhow::Context;
use meridian_server::{MeridianConfig, Runtime, init_tracing};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = MeridianConfig::load()?;
    init_tracing(config.logging())?;

    let bind = config.server().bind().clone();
    let runtime = Runtime::start(config).await?;
    let cancel = CancellationToken::new();
    let tasks = runtime.spawn_background(cancel.clone());

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    tracing::info!(bind = %bind, "Meridian listening");

    let shutdown = cancel.clone();
    axum::serve(
        listener,
        runtime
            .router()
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutting down");
        shutdown.cancel();
    })
    .await
    .context("Server error")?;

    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
    Ok(())
}
