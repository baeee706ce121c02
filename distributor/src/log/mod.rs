//! Durable log abstraction
//!
//! The distributor needs a small set of capabilities from its event store:
//! subject-addressed append, idempotent stream provisioning, and named durable
//! pull cursors with per-message in-progress and acknowledgment.
//!
//! Two backends implement [`DurableLog`]:
//! - [`MemoryLog`]: in-process, used for single-process deployments and tests
//! - `JetStreamLog` (feature `jetstream`): NATS JetStream
//!
//! # Example
//!
//! ```ignore
//! let log = MemoryLog::new();
//! log.ensure_stream(&StreamConfig::new("NETBOX", vec!["NETBOX.*".into()])).await?;
//! log.publish("NETBOX.device", payload).await?;
//!
//! let cursor = log.cursor(&CursorConfig::new("NETBOX", "ironic-device", "NETBOX.device")).await?;
//! for msg in cursor.fetch(10, Duration::from_secs(5)).await? {
//!     msg.in_progress().await?;
//!     msg.ack().await?;
//! }
//! ```

#[cfg(feature = "jetstream")]
pub mod jetstream;
pub mod memory;

use crate::error::LogError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

#[cfg(feature = "jetstream")]
pub use jetstream::JetStreamLog;
pub use memory::MemoryLog;

/// Default ack deadline for cursors
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(30);

/// Default maximum of outstanding pull requests per cursor
pub const DEFAULT_MAX_WAITING: usize = 128;

/// Stream definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub name: String,
    /// Subject patterns the stream captures
    pub subjects: Vec<String>,
    /// Messages older than this are discarded (zero keeps them forever)
    pub max_age: Duration,
}

impl StreamConfig {
    /// Create a stream definition with unlimited retention
    pub fn new(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
            max_age: Duration::ZERO,
        }
    }

    /// Set the retention age
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

/// What [`DurableLog::ensure_stream`] had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for Provisioned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provisioned::Created => "created",
            Provisioned::Updated => "updated",
            Provisioned::Unchanged => "unchanged",
        })
    }
}

/// Durable pull cursor definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorConfig {
    pub stream: String,
    pub durable_name: String,
    pub filter_subject: String,
    /// Time a delivered message may stay unacknowledged before redelivery
    pub ack_wait: Duration,
    pub max_waiting: usize,
}

impl CursorConfig {
    pub fn new(
        stream: impl Into<String>,
        durable_name: impl Into<String>,
        filter_subject: impl Into<String>,
    ) -> Self {
        Self {
            stream: stream.into(),
            durable_name: durable_name.into(),
            filter_subject: filter_subject.into(),
            ack_wait: DEFAULT_ACK_WAIT,
            max_waiting: DEFAULT_MAX_WAITING,
        }
    }

    pub fn ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }
}

/// Acknowledgment of an append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub stream: String,
    pub sequence: u64,
}

/// Delivery metadata of a fetched message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryInfo {
    pub stream_sequence: u64,
    /// Number of times this message has been delivered, starting at 1
    pub delivered: u64,
    pub published: DateTime<Utc>,
}

/// Backend side of per-message acknowledgment
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Reset the ack deadline
    async fn in_progress(&self) -> Result<(), LogError>;

    /// Acknowledge, removing the message from the cursor's pending set
    async fn ack(&self) -> Result<(), LogError>;
}

/// A message fetched from a cursor
///
/// [`LogMessage::ack`] takes the message by value, so every message is
/// acknowledged at most once.
pub struct LogMessage {
    pub subject: String,
    pub payload: Bytes,
    pub info: DeliveryInfo,
    acker: Box<dyn Acknowledger>,
}

impl LogMessage {
    pub fn new(
        subject: impl Into<String>,
        payload: Bytes,
        info: DeliveryInfo,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            subject: subject.into(),
            payload,
            info,
            acker,
        }
    }

    /// Tell the log processing is still underway
    pub async fn in_progress(&self) -> Result<(), LogError> {
        self.acker.in_progress().await
    }

    /// Acknowledge the message
    pub async fn ack(self) -> Result<(), LogError> {
        self.acker.ack().await
    }
}

impl fmt::Debug for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogMessage")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .field("info", &self.info)
            .finish()
    }
}

/// Durable, subject-partitioned event log
#[async_trait]
pub trait DurableLog: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Create the stream if absent, reconcile it if its definition differs
    ///
    /// Calling this twice with the same definition returns
    /// [`Provisioned::Unchanged`] the second time.
    async fn ensure_stream(&self, config: &StreamConfig) -> Result<Provisioned, LogError>;

    /// Append a payload under a subject
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<PublishReceipt, LogError>;

    /// Get or create a durable pull cursor
    async fn cursor(&self, config: &CursorConfig) -> Result<Box<dyn PullCursor>, LogError>;
}

/// Pull side of a durable cursor
#[async_trait]
pub trait PullCursor: Send + Sync {
    /// Durable name
    fn name(&self) -> &str;

    /// Fetch up to `max_messages`, waiting at most `expires` for the first one
    ///
    /// Returns an empty batch when nothing arrived in time.
    async fn fetch(
        &self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<LogMessage>, LogError>;
}
