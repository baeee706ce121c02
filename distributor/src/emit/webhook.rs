//! HTTP Webhook emitter
//!
//! POSTs the stored event bytes unchanged, as `application/json`, to a
//! destination URL. Only a 200 counts as delivered.
//!
//! # Example
//!
//! ```ignore
//! let emitter = WebhookEmitter::new()?;
//! emitter.emit("https://ironic.example.com/netbox", body).await?;
//! ```

use crate::emit::{DispatchError, Emitter};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// HTTP Webhook emitter - POSTs event bodies
pub struct WebhookEmitter {
    client: Client,
}

impl WebhookEmitter {
    /// Create an emitter with the default 5s request timeout
    ///
    /// # Errors
    /// Returns `DispatchError::Request` if the HTTP client cannot be created
    pub fn new() -> Result<Self, DispatchError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create an emitter with a custom request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Emitter for WebhookEmitter {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn emit(&self, url: &str, body: Bytes) -> Result<(), DispatchError> {
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        match request.send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                debug!(url = %url, "Webhook delivered");
                Ok(())
            }
            Ok(response) => {
                let status = response.status();
                warn!(url = %url, status = %status, "Webhook request failed");
                Err(DispatchError::Status {
                    status: status.as_u16(),
                })
            }
            Err(e) if e.is_timeout() => {
                warn!(url = %url, error = %e, "Webhook request timed out");
                Err(DispatchError::Timeout(e.to_string()))
            }
            Err(e) if e.is_builder() => Err(DispatchError::Request(e.to_string())),
            Err(e) => {
                warn!(url = %url, error = %e, "Webhook connection failed");
                Err(DispatchError::Transport(e.to_string()))
            }
        }
    }
}
