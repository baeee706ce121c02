//! Emitters deliver event bytes to destination endpoints
//!
//! The distributor talks to destinations through the [`Emitter`] trait so the
//! consumer loop can be driven by fakes in tests. [`WebhookEmitter`] is the
//! HTTP implementation used in production.

pub mod webhook;

use crate::retry::FailureClass;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use webhook::WebhookEmitter;

/// A single delivery attempt failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The destination answered with something other than 200
    #[error("destination responded with status {status}")]
    Status { status: u16 },

    /// No answer within the request timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection could not be established or broke
    #[error("transport error: {0}")]
    Transport(String),

    /// The request could not be built (bad URL, bad header)
    #[error("invalid request: {0}")]
    Request(String),
}

impl DispatchError {
    /// Timeouts and 500/503 answers are worth retrying, everything else is final
    pub fn classify(&self) -> FailureClass {
        match self {
            DispatchError::Timeout(_) => FailureClass::Retryable,
            DispatchError::Status { status: 500 | 503 } => FailureClass::Retryable,
            _ => FailureClass::Terminal,
        }
    }

    /// HTTP status, when the destination answered
    pub fn status(&self) -> Option<u16> {
        match self {
            DispatchError::Status { status } => Some(*status),
            _ => None,
        }
    }
}

/// Emitter trait - delivers one event body to one endpoint
///
/// # Example
///
/// ```ignore
/// struct RecordingEmitter {
///     seen: Mutex<Vec<Bytes>>,
/// }
///
/// #[async_trait]
/// impl Emitter for RecordingEmitter {
///     fn name(&self) -> &'static str { "recording" }
///
///     async fn emit(&self, _url: &str, body: Bytes) -> Result<(), DispatchError> {
///         self.seen.lock().push(body);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Emitter: Send + Sync {
    /// Emitter name for identification and logging
    fn name(&self) -> &'static str;

    /// Make one delivery attempt
    ///
    /// Ok(()) only when the endpoint accepted the event. Retrying is the
    /// caller's business.
    async fn emit(&self, url: &str, body: Bytes) -> Result<(), DispatchError>;
}
