//! NetBox webhook distributor
//!
//! Receives change webhooks from NetBox, persists them to a durable
//! subject-partitioned log, and fans them out to any number of HTTP
//! destinations with at-least-once delivery and bounded retry.
//!
//! # Architecture
//!
//! ```text
//! NetBox ──► server (POST) ──► Publisher ──► DurableLog ──► Consumer per
//!                                                           (destination, objectType)
//!                                                               │
//!                                                               ▼
//!                                                   Emitter (HTTP POST + retry)
//! ```
//!
//! The log and the emitter sit behind traits, so the pipeline runs in one
//! process on [`MemoryLog`] or across processes on NATS JetStream (feature
//! `jetstream`).

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod config;
pub mod consumer;
pub mod distributor;
pub mod emit;
pub mod error;
pub mod event;
pub mod log;
pub mod metrics;
pub mod metrics_server;
pub mod publisher;
pub mod retry;
pub mod server;
pub mod subject;

pub use config::{Config, Destination, DestinationList, Role};
pub use consumer::{Consumer, ConsumerOptions, MessageOutcome};
pub use distributor::{Distributor, RunningDistributor};
pub use emit::{DispatchError, Emitter, WebhookEmitter};
pub use error::{DistributorError, LogError, PublishError, Result};
pub use event::WebhookEvent;
#[cfg(feature = "jetstream")]
pub use log::JetStreamLog;
pub use log::{DurableLog, MemoryLog};
pub use publisher::{Publisher, PublisherConfig};
pub use retry::{Backoff, FailureClass, RetryOutcome};
pub use subject::{RegionStrategy, SubjectScheme};
