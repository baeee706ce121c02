//! NATS JetStream backend
//!
//! Maps the [`DurableLog`] contract onto JetStream streams and durable pull
//! consumers.

use super::{
    Acknowledger, CursorConfig, DeliveryInfo, DurableLog, LogMessage, Provisioned, PublishReceipt,
    PullCursor, StreamConfig,
};
use crate::error::LogError;
use async_nats::jetstream::{
    self, AckKind,
    consumer::{self, pull},
    stream,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reconnect attempts before the client gives up
const MAX_RECONNECTS: usize = 100;

fn backend<E: std::fmt::Display>(e: E) -> LogError {
    LogError::Backend(e.to_string())
}

/// JetStream-backed [`DurableLog`]
#[derive(Clone)]
pub struct JetStreamLog {
    context: jetstream::Context,
}

impl JetStreamLog {
    /// Connect to a NATS server
    pub async fn connect(url: &str) -> Result<Self, LogError> {
        let client = async_nats::ConnectOptions::new()
            .max_reconnects(MAX_RECONNECTS)
            .connect(url)
            .await
            .map_err(backend)?;
        info!(url = %url, "Connected to NATS");
        Ok(Self::from_client(client))
    }

    /// Wrap an existing client
    pub fn from_client(client: async_nats::Client) -> Self {
        Self {
            context: jetstream::new(client),
        }
    }

    fn stream_config(config: &StreamConfig) -> stream::Config {
        stream::Config {
            name: config.name.clone(),
            subjects: config.subjects.clone(),
            max_age: config.max_age,
            ..Default::default()
        }
    }

    async fn reconcile(&self, config: &StreamConfig) -> Result<Provisioned, LogError> {
        let stream = self
            .context
            .get_stream(&config.name)
            .await
            .map_err(backend)?;
        let current = &stream.cached_info().config;
        if current.subjects == config.subjects && current.max_age == config.max_age {
            return Ok(Provisioned::Unchanged);
        }

        let desired = stream::Config {
            subjects: config.subjects.clone(),
            max_age: config.max_age,
            ..current.clone()
        };
        self.context
            .update_stream(&desired)
            .await
            .map_err(backend)?;
        Ok(Provisioned::Updated)
    }
}

#[async_trait]
impl DurableLog for JetStreamLog {
    fn name(&self) -> &'static str {
        "jetstream"
    }

    async fn ensure_stream(&self, config: &StreamConfig) -> Result<Provisioned, LogError> {
        if self.context.get_stream(&config.name).await.is_ok() {
            return self.reconcile(config).await;
        }

        match self
            .context
            .create_stream(Self::stream_config(config))
            .await
        {
            Ok(_) => Ok(Provisioned::Created),
            Err(e) => {
                // Another instance may have created it first
                debug!(stream = %config.name, error = %e, "Stream create failed, reconciling");
                self.reconcile(config).await
            }
        }
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<PublishReceipt, LogError> {
        let ack = self
            .context
            .publish(subject.to_string(), payload)
            .await
            .map_err(backend)?
            .await
            .map_err(backend)?;
        Ok(PublishReceipt {
            stream: ack.stream,
            sequence: ack.sequence,
        })
    }

    async fn cursor(&self, config: &CursorConfig) -> Result<Box<dyn PullCursor>, LogError> {
        let stream = self
            .context
            .get_stream(&config.stream)
            .await
            .map_err(|_| LogError::StreamNotFound(config.stream.clone()))?;

        let desired = pull::Config {
            durable_name: Some(config.durable_name.clone()),
            filter_subject: config.filter_subject.clone(),
            ack_wait: config.ack_wait,
            max_waiting: config.max_waiting as i64,
            ..Default::default()
        };

        // An existing durable keeps its position but takes the new settings
        let consumer = match stream.get_consumer::<pull::Config>(&config.durable_name).await {
            Ok(existing) => {
                if consumer_drifted(&existing.cached_info().config, &desired) {
                    info!(
                        cursor = %config.durable_name,
                        filter = %config.filter_subject,
                        "Updating cursor settings"
                    );
                    stream.update_consumer(desired).await.map_err(backend)?
                } else {
                    existing
                }
            }
            Err(_) => stream.create_consumer(desired).await.map_err(backend)?,
        };

        Ok(Box::new(JetStreamCursor {
            name: config.durable_name.clone(),
            consumer,
        }))
    }
}

fn consumer_drifted(current: &consumer::Config, desired: &pull::Config) -> bool {
    current.filter_subject != desired.filter_subject
        || current.ack_wait != desired.ack_wait
        || current.max_waiting != desired.max_waiting
}

struct JetStreamCursor {
    name: String,
    consumer: jetstream::consumer::PullConsumer,
}

#[async_trait]
impl PullCursor for JetStreamCursor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<LogMessage>, LogError> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(max_messages.max(1))
            .expires(expires)
            .messages()
            .await
            .map_err(backend)?;

        let mut out = Vec::new();
        while let Some(next) = batch.next().await {
            let message = match next {
                Ok(message) => message,
                Err(e) => {
                    warn!(cursor = %self.name, error = %e, "Dropping broken delivery");
                    continue;
                }
            };
            let info = match message.info() {
                Ok(info) => DeliveryInfo {
                    stream_sequence: info.stream_sequence,
                    delivered: info.delivered.max(0) as u64,
                    published: DateTime::<Utc>::from_timestamp_nanos(
                        info.published.unix_timestamp_nanos() as i64,
                    ),
                },
                Err(e) => {
                    warn!(cursor = %self.name, error = %e, "Delivery without metadata");
                    DeliveryInfo {
                        stream_sequence: 0,
                        delivered: 1,
                        published: Utc::now(),
                    }
                }
            };
            out.push(LogMessage::new(
                message.subject.to_string(),
                message.payload.clone(),
                info,
                Box::new(JetStreamAcker { message }),
            ));
        }
        Ok(out)
    }
}

struct JetStreamAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledger for JetStreamAcker {
    async fn in_progress(&self) -> Result<(), LogError> {
        self.message
            .ack_with(AckKind::Progress)
            .await
            .map_err(backend)
    }

    async fn ack(&self) -> Result<(), LogError> {
        self.message.double_ack().await.map_err(backend)
    }
}
