//! HTTP Surface
//!
//! `axum` routers for the gateway and the listing service, error mapping,
//! CORS, the per-subscription tick forwarder and the server runner.

mod cors;
mod error;
mod forwarder;
mod gateway;
mod listings;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

pub use cors::cors_layer;
pub use error::{ApiError, ErrorBody};
pub use forwarder::spawn_forwarder;
pub use gateway::{AppState, gateway_router};
pub use listings::{ListingsState, listings_router};

/// Serve `app` on `addr` until `cancel` fires.
///
/// # Errors
///
/// Returns `ServerError` if binding fails or the server encounters a fatal
/// error while running.
pub async fn serve(app: Router, addr: &str, cancel: CancellationToken) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::BindFailed(addr.to_string(), e.to_string()))?;

    tracing::info!(addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

/// Cancel `token` on SIGTERM or Ctrl+C.
pub async fn shutdown_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
        () = token.cancelled() => return,
    }

    token.cancel();
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listener.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(String, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
