//! Error types for the distributor

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for distributor operations
pub type Result<T> = std::result::Result<T, DistributorError>;

/// Main error type for the distributor
#[derive(Error, Debug)]
pub enum DistributorError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable log error
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Publishing an ingested event failed
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    /// A consumer could not attach to its cursor
    #[error("subscription '{cursor}' failed: {source}")]
    Subscription {
        cursor: String,
        #[source]
        source: LogError,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),
}

impl From<prometheus::Error> for DistributorError {
    fn from(err: prometheus::Error) -> Self {
        DistributorError::Metrics(err.to_string())
    }
}

/// Error type for durable log backends
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// No stream covers the subject
    #[error("no stream accepts subject '{0}'")]
    NoStream(String),

    /// Stream does not exist
    #[error("stream '{0}' not found")]
    StreamNotFound(String),

    /// Stream subjects overlap with another stream
    #[error("subjects of stream '{stream}' overlap with stream '{other}'")]
    SubjectOverlap { stream: String, other: String },

    /// Invalid stream or cursor configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Cursor was removed while a message was outstanding
    #[error("cursor '{0}' not found")]
    CursorNotFound(String),

    /// Backend failure (connection, protocol, server error)
    #[error("backend error: {0}")]
    Backend(String),
}

/// Error returned by the publisher
#[derive(Error, Debug)]
pub enum PublishError {
    /// The stream could not be created or reconciled
    #[error("stream provisioning failed: {0}")]
    Provision(#[source] LogError),

    /// The event could not be serialized
    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// The log rejected the append
    #[error("append to subject '{subject}' failed: {source}")]
    Append {
        subject: String,
        #[source]
        source: LogError,
    },
}

impl From<&PublishError> for StatusCode {
    fn from(_: &PublishError) -> Self {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
