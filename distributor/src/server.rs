//! Webhook ingestion server
//!
//! NetBox is configured to POST to [`WEBHOOK_PATH`]. Every body is decoded as
//! a [`WebhookEvent`] and published; the answer is 200 with an empty body once
//! the log has the event, 500 otherwise so NetBox can retry.

use crate::error::{DistributorError, Result};
use crate::event::WebhookEvent;
use crate::metrics::IngestMetrics;
use crate::publisher::Publisher;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Route NetBox posts webhooks to
pub const WEBHOOK_PATH: &str = "/handler/netbox/webhook";

#[derive(Clone)]
struct IngestState {
    publisher: Arc<Publisher>,
    metrics: IngestMetrics,
}

/// Router exposing the webhook endpoint and `/health`
pub fn router(publisher: Arc<Publisher>, metrics: IngestMetrics) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(IngestState { publisher, metrics })
}

async fn webhook_handler(State(state): State<IngestState>, body: Bytes) -> StatusCode {
    let event = match WebhookEvent::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, bytes = body.len(), "Rejecting undecodable webhook");
            state.metrics.record_failure();
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    state.metrics.record_received(&event.model, &event.event);
    debug!(
        event = %event.event,
        model = %event.model,
        region = event.site_slug().unwrap_or_default(),
        name = event.object_name().unwrap_or_default(),
        status = event.status().unwrap_or_default(),
        role = event.role().unwrap_or_default(),
        "Webhook received"
    );

    match state.publisher.publish(&event).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            error!(
                event = %event.event,
                model = %event.model,
                error = %e,
                "Failed to publish webhook"
            );
            state.metrics.record_failure();
            StatusCode::from(&e)
        }
    }
}

async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Serve `app` on `addr` until `shutdown` is cancelled
pub async fn serve(addr: SocketAddr, app: Router, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        DistributorError::Config(format!("failed to bind webhook server to {addr}: {e}"))
    })?;
    info!(%addr, path = WEBHOOK_PATH, "Webhook server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Webhook server stopped");
    Ok(())
}
