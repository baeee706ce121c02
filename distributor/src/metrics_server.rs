//! HTTP server for Prometheus metrics endpoint
//!
//! Runs a lightweight HTTP server on a separate port for Prometheus scraping.
//!
//! # Example
//!
//! ```ignore
//! use netbox_distributor::metrics_server::MetricsServer;
//!
//! let shutdown = CancellationToken::new();
//! let metrics_handle = MetricsServer::start(addr, registry.clone(), shutdown.clone());
//!
//! // Later
//! shutdown.cancel();
//! metrics_handle.await?;
//! ```

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use prometheus::Registry;
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Metrics HTTP server
pub struct MetricsServer;

impl MetricsServer {
    /// Start the metrics server on the given address
    ///
    /// The server runs until `shutdown` is cancelled.
    pub fn start(
        addr: SocketAddr,
        registry: Registry,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(%addr, "Metrics server starting");

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(error = %e, %addr, "Failed to bind metrics server");
                    return;
                }
            };

            let serve = axum::serve(listener, router(registry))
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "Metrics server error");
            }
        })
    }
}

/// Router with `/metrics` and `/health`
pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(registry)
}

/// Handler for /metrics endpoint
async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    let body = crate::metrics::gather(&registry);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Handler for /health endpoint
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
