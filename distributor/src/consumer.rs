//! Distribution consumer - delivers log events to one destination
//!
//! A [`Consumer`] owns the delivery counters of one destination and runs one
//! pull loop per watched object type (see [`Consumer::run`]). Each loop fetches
//! from a durable cursor named `<destination>-<objectType>` and hands every
//! message to [`Consumer::handle`]:
//!
//! ```text
//! fetch ──► in_progress ──► decode ──► watched? ──► dispatch (retry) ──► ack
//!                             │           │               │
//!                             └─ malformed └─ filtered     └─ rejected / exhausted
//!                                   │           │                     │
//!                                   └───────────┴──────► ack ◄────────┘
//! ```
//!
//! A fetched batch is marked in progress as a whole, and messages still
//! waiting their turn are refreshed along with the one being retried.
//!
//! Every path ends in exactly one acknowledgment. Events that cannot be
//! delivered are dropped after the ack and counted as errors.

use crate::config::Destination;
use crate::emit::{DispatchError, Emitter};
use crate::error::{DistributorError, Result};
use crate::event::WebhookEvent;
use crate::log::{CursorConfig, DEFAULT_ACK_WAIT, DEFAULT_MAX_WAITING, DurableLog, LogMessage};
use crate::metrics::DistributionMetrics;
use crate::retry::{Backoff, RetryOutcome, retry};
use crate::subject::{self, SubjectScheme};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pull loop settings shared by all consumers
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Stream the cursors read from
    pub stream: String,
    /// Must match the scheme the publisher writes with
    pub scheme: SubjectScheme,
    /// Messages per fetch
    pub batch_size: usize,
    /// Longest wait of a single fetch
    pub fetch_timeout: Duration,
    pub ack_wait: Duration,
    pub max_waiting: usize,
    /// Pause after a failed fetch
    pub fetch_error_pause: Duration,
    pub backoff: Backoff,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            stream: "NETBOX".to_string(),
            scheme: SubjectScheme::Object,
            batch_size: 1,
            fetch_timeout: Duration::from_secs(5),
            ack_wait: DEFAULT_ACK_WAIT,
            max_waiting: DEFAULT_MAX_WAITING,
            fetch_error_pause: Duration::from_secs(1),
            backoff: Backoff::default(),
        }
    }
}

/// How a single message was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The destination accepted the event
    Delivered { attempts: u32 },
    /// The destination does not watch this event kind
    Filtered,
    /// The payload was not a webhook event
    Malformed,
    /// The destination answered with a non-retryable error
    Rejected { status: Option<u16> },
    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32 },
}

/// Delivers events to one destination
pub struct Consumer {
    destination: Destination,
    log: Arc<dyn DurableLog>,
    emitter: Arc<dyn Emitter>,
    metrics: DistributionMetrics,
    options: ConsumerOptions,
}

impl Consumer {
    /// Create a consumer and register its counters on `registry`
    ///
    /// # Errors
    /// Returns `DistributorError::Metrics` if counters for this destination
    /// are already registered.
    pub fn new(
        destination: Destination,
        log: Arc<dyn DurableLog>,
        emitter: Arc<dyn Emitter>,
        registry: &Registry,
        options: ConsumerOptions,
    ) -> Result<Self> {
        let metrics = DistributionMetrics::register(registry, &destination.name)?;
        Ok(Self {
            destination,
            log,
            emitter,
            metrics,
            options,
        })
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn metrics(&self) -> &DistributionMetrics {
        &self.metrics
    }

    /// Cursor definition for one watched object type
    pub fn cursor_config(&self, object_type: &str) -> CursorConfig {
        let mut config = CursorConfig::new(
            self.options.stream.clone(),
            subject::durable_name(&self.destination.name, object_type),
            self.options
                .scheme
                .filter_subject(object_type, self.destination.region.as_deref()),
        )
        .ack_wait(self.options.ack_wait);
        config.max_waiting = self.options.max_waiting;
        config
    }

    /// Pull loop for one object type, runs until `shutdown` is cancelled
    ///
    /// Fails only if the cursor cannot be set up. A message being dispatched
    /// when shutdown arrives is finished and acknowledged first.
    pub async fn run(&self, object_type: &str, shutdown: CancellationToken) -> Result<()> {
        let config = self.cursor_config(object_type);
        let cursor =
            self.log
                .cursor(&config)
                .await
                .map_err(|source| DistributorError::Subscription {
                    cursor: config.durable_name.clone(),
                    source,
                })?;

        info!(
            destination = %self.destination.name,
            object_type = %object_type,
            cursor = %cursor.name(),
            filter = %config.filter_subject,
            "Subscription started"
        );

        while !shutdown.is_cancelled() {
            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                fetched = cursor.fetch(self.options.batch_size, self.options.fetch_timeout) => fetched,
            };

            let messages = match fetched {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(
                        cursor = %cursor.name(),
                        error = %e,
                        "Fetch failed"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.options.fetch_error_pause) => {}
                    }
                    continue;
                }
            };

            if self.handle_batch(object_type, messages, &shutdown).await.is_none() {
                break;
            }
        }

        info!(cursor = %cursor.name(), "Subscription stopped");
        Ok(())
    }

    /// Settle one message fetched from the `object_type` cursor
    pub async fn handle(&self, object_type: &str, msg: LogMessage) -> MessageOutcome {
        self.mark_in_progress(&msg).await;
        self.settle(object_type, msg, &[]).await
    }

    /// Settle a fetched batch in order
    ///
    /// Every message is marked in progress up front, and the ones still
    /// waiting are refreshed while an earlier one is being retried. Returns
    /// `None` when `shutdown` fires mid-batch; the unsettled rest is
    /// redelivered after the ack deadline.
    pub async fn handle_batch(
        &self,
        object_type: &str,
        mut messages: Vec<LogMessage>,
        shutdown: &CancellationToken,
    ) -> Option<Vec<MessageOutcome>> {
        for msg in &messages {
            self.mark_in_progress(msg).await;
        }

        // Settled from the back, so what is left is always the waiting tail
        messages.reverse();
        let mut outcomes = Vec::with_capacity(messages.len());
        while let Some(msg) = messages.pop() {
            if shutdown.is_cancelled() {
                return None;
            }
            outcomes.push(self.settle(object_type, msg, &messages).await);
        }
        Some(outcomes)
    }

    async fn mark_in_progress(&self, msg: &LogMessage) {
        if let Err(e) = msg.in_progress().await {
            warn!(
                destination = %self.destination.name,
                sequence = msg.info.stream_sequence,
                error = %e,
                "Failed to mark event in progress"
            );
        }
    }

    /// Filter, dispatch and ack a message already marked in progress
    async fn settle(
        &self,
        object_type: &str,
        msg: LogMessage,
        waiting: &[LogMessage],
    ) -> MessageOutcome {
        let event = match WebhookEvent::from_slice(&msg.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    destination = %self.destination.name,
                    subject = %msg.subject,
                    sequence = msg.info.stream_sequence,
                    error = %e,
                    "Dropping malformed event"
                );
                self.ack(msg).await;
                return MessageOutcome::Malformed;
            }
        };

        if !self.destination.wants(object_type, &event.event) {
            debug!(
                destination = %self.destination.name,
                object_type = %object_type,
                event = %event.event,
                "Event kind not watched, skipping"
            );
            self.ack(msg).await;
            return MessageOutcome::Filtered;
        }

        let outcome = self.dispatch(&msg, waiting).await;
        let settled = match outcome {
            RetryOutcome::Success { attempts, .. } => {
                self.metrics.record_success();
                debug!(
                    destination = %self.destination.name,
                    event = %event.event,
                    model = %event.model,
                    attempts,
                    "Event distributed"
                );
                MessageOutcome::Delivered { attempts }
            }
            RetryOutcome::Terminal { error, attempts } => {
                self.metrics.record_error();
                error!(
                    destination = %self.destination.name,
                    url = %self.destination.url,
                    event = %event.event,
                    model = %event.model,
                    attempts,
                    error = %error,
                    "Destination rejected event, dropping it"
                );
                MessageOutcome::Rejected {
                    status: error.status(),
                }
            }
            RetryOutcome::Exhausted { error, attempts } => {
                self.metrics.record_error();
                error!(
                    destination = %self.destination.name,
                    url = %self.destination.url,
                    event = %event.event,
                    model = %event.model,
                    attempts,
                    error = %error,
                    "Done retrying, dropping event"
                );
                MessageOutcome::Exhausted { attempts }
            }
        };

        self.ack(msg).await;
        settled
    }

    async fn dispatch(
        &self,
        msg: &LogMessage,
        waiting: &[LogMessage],
    ) -> RetryOutcome<(), DispatchError> {
        let emitter = &self.emitter;
        let url = self.destination.url.as_str();

        retry(&self.options.backoff, DispatchError::classify, |attempt| async move {
            if attempt > 0 {
                // Keep the log from redelivering while we are still retrying
                for pending in std::iter::once(msg).chain(waiting) {
                    if let Err(e) = pending.in_progress().await {
                        debug!(
                            sequence = pending.info.stream_sequence,
                            error = %e,
                            "Failed to extend ack deadline"
                        );
                    }
                }
            }
            emitter.emit(url, msg.payload.clone()).await
        })
        .await
    }

    async fn ack(&self, msg: LogMessage) {
        let sequence = msg.info.stream_sequence;
        if let Err(e) = msg.ack().await {
            error!(
                destination = %self.destination.name,
                sequence,
                error = %e,
                "Failed to acknowledge event"
            );
        }
    }
}
