pub mod routes;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::orchestrator::Orchestrator;

use routes::AppState;

/// Project trees arrive inline as JSON, so allow far more than axum's 2 MiB.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

pub fn app(orchestrator: Arc<Orchestrator>) -> axum::Router {
    routes::router(AppState { orchestrator })
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
}

/// Serve the HTTP API on `listener` until `cancel` fires, then tear down
/// every running project.
pub async fn serve(
    orchestrator: Arc<Orchestrator>,
    listener: TcpListener,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "listening");

    let result = axum::serve(listener, app(orchestrator.clone()))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await;

    orchestrator.shutdown().await;
    info!("server stopped");
    result.map_err(Into::into)
}

/// Cancel `token` on Ctrl-C or SIGTERM.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
