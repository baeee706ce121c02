//! In-process durable log
//!
//! Keeps streams in memory behind a single lock and follows JetStream
//! semantics closely enough that the distributor behaves the same on either
//! backend: wildcard subjects, age retention, durable cursors that start at the
//! oldest retained message, ack deadlines with redelivery, and independent
//! fan-out between cursors.
//!
//! Nothing survives a restart; use the JetStream backend when the log has to
//! outlive the process.

use super::{
    Acknowledger, CursorConfig, DeliveryInfo, DurableLog, LogMessage, Provisioned, PublishReceipt,
    PullCursor, StreamConfig,
};
use crate::error::LogError;
use crate::subject;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// In-memory [`DurableLog`]
#[derive(Clone, Default)]
pub struct MemoryLog {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    /// Woken on every append
    appended: Notify,
}

#[derive(Default)]
struct State {
    streams: HashMap<String, Stream>,
}

struct Stream {
    config: StreamConfig,
    /// Contiguous by sequence; eviction only pops from the front
    messages: VecDeque<Stored>,
    last_sequence: u64,
    cursors: HashMap<String, Cursor>,
}

struct Stored {
    sequence: u64,
    subject: String,
    payload: Bytes,
    received: Instant,
    published: DateTime<Utc>,
}

struct Cursor {
    filter: String,
    ack_wait: Duration,
    next_sequence: u64,
    pending: BTreeMap<u64, Pending>,
    acked: u64,
    redelivered: u64,
}

struct Pending {
    deadline: Instant,
    delivered: u64,
}

/// Snapshot of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub config: StreamConfig,
    pub messages: usize,
    pub first_sequence: u64,
    pub last_sequence: u64,
}

/// Snapshot of a durable cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorInfo {
    pub filter_subject: String,
    /// Delivered but not yet acknowledged
    pub pending: usize,
    pub acked: u64,
    pub redelivered: u64,
    pub next_sequence: u64,
}

struct Delivery {
    sequence: u64,
    subject: String,
    payload: Bytes,
    delivered: u64,
    published: DateTime<Utc>,
}

impl Stream {
    fn new(config: StreamConfig) -> Self {
        Self {
            config,
            messages: VecDeque::new(),
            last_sequence: 0,
            cursors: HashMap::new(),
        }
    }

    fn first_sequence(&self) -> u64 {
        self.messages
            .front()
            .map_or(self.last_sequence + 1, |m| m.sequence)
    }

    fn evict_expired(&mut self, now: Instant) {
        let max_age = self.config.max_age;
        if max_age.is_zero() {
            return;
        }
        while let Some(front) = self.messages.front() {
            if now.saturating_duration_since(front.received) < max_age {
                break;
            }
            self.messages.pop_front();
        }
    }

    /// Hand out expired pending messages first, then new ones
    fn deliver(
        &mut self,
        durable: &str,
        max: usize,
        now: Instant,
    ) -> Result<Vec<Delivery>, LogError> {
        let first = self.first_sequence();
        let cursor = self
            .cursors
            .get_mut(durable)
            .ok_or_else(|| LogError::CursorNotFound(durable.to_string()))?;

        cursor.pending.retain(|sequence, _| *sequence >= first);
        cursor.next_sequence = cursor.next_sequence.max(first);

        let mut out = Vec::new();
        let expired: Vec<u64> = cursor
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(sequence, _)| *sequence)
            .take(max)
            .collect();

        for sequence in expired {
            let Some(stored) = self.messages.get((sequence - first) as usize) else {
                continue;
            };
            let Some(pending) = cursor.pending.get_mut(&sequence) else {
                continue;
            };
            pending.delivered += 1;
            pending.deadline = now + cursor.ack_wait;
            cursor.redelivered += 1;
            out.push(Delivery::of(stored, pending.delivered));
        }

        while out.len() < max {
            let Some(stored) = self
                .messages
                .get((cursor.next_sequence - first) as usize)
            else {
                break;
            };
            cursor.next_sequence += 1;
            if !subject::matches(&cursor.filter, &stored.subject) {
                continue;
            }
            cursor.pending.insert(
                stored.sequence,
                Pending {
                    deadline: now + cursor.ack_wait,
                    delivered: 1,
                },
            );
            out.push(Delivery::of(stored, 1));
        }

        Ok(out)
    }

    fn next_redelivery(&self, durable: &str) -> Option<Instant> {
        self.cursors
            .get(durable)?
            .pending
            .values()
            .map(|p| p.deadline)
            .min()
    }
}

impl Delivery {
    fn of(stored: &Stored, delivered: u64) -> Self {
        Self {
            sequence: stored.sequence,
            subject: stored.subject.clone(),
            payload: stored.payload.clone(),
            delivered,
            published: stored.published,
        }
    }
}

impl MemoryLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a stream, if it exists
    pub fn stream_info(&self, name: &str) -> Option<StreamInfo> {
        let state = self.shared.state.lock();
        let stream = state.streams.get(name)?;
        Some(StreamInfo {
            config: stream.config.clone(),
            messages: stream.messages.len(),
            first_sequence: stream.first_sequence(),
            last_sequence: stream.last_sequence,
        })
    }

    /// Snapshot of a durable cursor, if it exists
    pub fn cursor_info(&self, stream: &str, durable: &str) -> Option<CursorInfo> {
        let state = self.shared.state.lock();
        let cursor = state.streams.get(stream)?.cursors.get(durable)?;
        Some(CursorInfo {
            filter_subject: cursor.filter.clone(),
            pending: cursor.pending.len(),
            acked: cursor.acked,
            redelivered: cursor.redelivered,
            next_sequence: cursor.next_sequence,
        })
    }
}

fn validate_stream(config: &StreamConfig) -> Result<(), LogError> {
    if config.name.is_empty() || config.name.contains(['.', '*', '>', ' ']) {
        return Err(LogError::InvalidConfig(format!(
            "invalid stream name '{}'",
            config.name
        )));
    }
    if config.subjects.is_empty() {
        return Err(LogError::InvalidConfig(format!(
            "stream '{}' has no subjects",
            config.name
        )));
    }
    if let Some(bad) = config.subjects.iter().find(|s| !subject::is_valid(s)) {
        return Err(LogError::InvalidConfig(format!("invalid subject '{bad}'")));
    }
    Ok(())
}

#[async_trait]
impl DurableLog for MemoryLog {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_stream(&self, config: &StreamConfig) -> Result<Provisioned, LogError> {
        validate_stream(config)?;

        let mut state = self.shared.state.lock();
        for (other_name, other) in &state.streams {
            if *other_name == config.name {
                continue;
            }
            let clash = config.subjects.iter().any(|s| {
                other
                    .config
                    .subjects
                    .iter()
                    .any(|o| subject::overlaps(s, o))
            });
            if clash {
                return Err(LogError::SubjectOverlap {
                    stream: config.name.clone(),
                    other: other_name.clone(),
                });
            }
        }

        match state.streams.get_mut(&config.name) {
            None => {
                state
                    .streams
                    .insert(config.name.clone(), Stream::new(config.clone()));
                Ok(Provisioned::Created)
            }
            Some(stream) if stream.config == *config => Ok(Provisioned::Unchanged),
            Some(stream) => {
                stream.config = config.clone();
                stream.evict_expired(Instant::now());
                Ok(Provisioned::Updated)
            }
        }
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<PublishReceipt, LogError> {
        if !subject::is_valid(subject) || subject.contains(['*', '>']) {
            return Err(LogError::InvalidConfig(format!(
                "invalid publish subject '{subject}'"
            )));
        }

        let receipt = {
            let mut state = self.shared.state.lock();
            let stream = state
                .streams
                .values_mut()
                .find(|s| s.config.subjects.iter().any(|p| subject::matches(p, subject)))
                .ok_or_else(|| LogError::NoStream(subject.to_string()))?;

            let now = Instant::now();
            stream.evict_expired(now);
            stream.last_sequence += 1;
            stream.messages.push_back(Stored {
                sequence: stream.last_sequence,
                subject: subject.to_string(),
                payload,
                received: now,
                published: Utc::now(),
            });

            PublishReceipt {
                stream: stream.config.name.clone(),
                sequence: stream.last_sequence,
            }
        };

        self.shared.appended.notify_waiters();
        Ok(receipt)
    }

    async fn cursor(&self, config: &CursorConfig) -> Result<Box<dyn PullCursor>, LogError> {
        if config.durable_name.is_empty() || config.durable_name.contains(['.', '*', '>', ' ']) {
            return Err(LogError::InvalidConfig(format!(
                "invalid durable name '{}'",
                config.durable_name
            )));
        }
        if !subject::is_valid(&config.filter_subject) {
            return Err(LogError::InvalidConfig(format!(
                "invalid filter subject '{}'",
                config.filter_subject
            )));
        }

        let mut state = self.shared.state.lock();
        let stream = state
            .streams
            .get_mut(&config.stream)
            .ok_or_else(|| LogError::StreamNotFound(config.stream.clone()))?;

        let covered = stream
            .config
            .subjects
            .iter()
            .any(|s| subject::overlaps(s, &config.filter_subject));
        if !covered {
            return Err(LogError::InvalidConfig(format!(
                "filter '{}' does not match any subject of stream '{}'",
                config.filter_subject, config.stream
            )));
        }

        let first = stream.first_sequence();
        stream
            .cursors
            .entry(config.durable_name.clone())
            .and_modify(|cursor| {
                cursor.filter = config.filter_subject.clone();
                cursor.ack_wait = config.ack_wait;
            })
            .or_insert_with(|| Cursor {
                filter: config.filter_subject.clone(),
                ack_wait: config.ack_wait,
                next_sequence: first,
                pending: BTreeMap::new(),
                acked: 0,
                redelivered: 0,
            });

        Ok(Box::new(MemoryCursor {
            shared: Arc::clone(&self.shared),
            stream: config.stream.clone(),
            durable: config.durable_name.clone(),
        }))
    }
}

struct MemoryCursor {
    shared: Arc<Shared>,
    stream: String,
    durable: String,
}

#[async_trait]
impl PullCursor for MemoryCursor {
    fn name(&self) -> &str {
        &self.durable
    }

    async fn fetch(
        &self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<LogMessage>, LogError> {
        let deadline = Instant::now() + expires;
        let max = max_messages.max(1);

        loop {
            // Registered before the state check so an append in between is not missed
            let appended = self.shared.appended.notified();

            let wake_at = {
                let mut state = self.shared.state.lock();
                let stream = state
                    .streams
                    .get_mut(&self.stream)
                    .ok_or_else(|| LogError::StreamNotFound(self.stream.clone()))?;

                let now = Instant::now();
                stream.evict_expired(now);
                let batch = stream.deliver(&self.durable, max, now)?;
                if !batch.is_empty() {
                    return Ok(batch
                        .into_iter()
                        .map(|d| self.wrap(d))
                        .collect());
                }
                if now >= deadline {
                    return Ok(Vec::new());
                }
                stream
                    .next_redelivery(&self.durable)
                    .map_or(deadline, |redeliver| redeliver.min(deadline))
            };

            tokio::select! {
                _ = appended => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }
}

impl MemoryCursor {
    fn wrap(&self, delivery: Delivery) -> LogMessage {
        let acker = MemoryAcker {
            shared: Arc::clone(&self.shared),
            stream: self.stream.clone(),
            durable: self.durable.clone(),
            sequence: delivery.sequence,
        };
        LogMessage::new(
            delivery.subject,
            delivery.payload,
            DeliveryInfo {
                stream_sequence: delivery.sequence,
                delivered: delivery.delivered,
                published: delivery.published,
            },
            Box::new(acker),
        )
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    stream: String,
    durable: String,
    sequence: u64,
}

impl MemoryAcker {
    fn with_cursor<T>(&self, f: impl FnOnce(&mut Cursor) -> T) -> Result<T, LogError> {
        let mut state = self.shared.state.lock();
        let cursor = state
            .streams
            .get_mut(&self.stream)
            .and_then(|s| s.cursors.get_mut(&self.durable))
            .ok_or_else(|| LogError::CursorNotFound(self.durable.clone()))?;
        Ok(f(cursor))
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn in_progress(&self) -> Result<(), LogError> {
        self.with_cursor(|cursor| {
            let ack_wait = cursor.ack_wait;
            if let Some(pending) = cursor.pending.get_mut(&self.sequence) {
                pending.deadline = Instant::now() + ack_wait;
            }
        })
    }

    async fn ack(&self) -> Result<(), LogError> {
        self.with_cursor(|cursor| {
            if cursor.pending.remove(&self.sequence).is_some() {
                cursor.acked += 1;
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn netbox_stream() -> StreamConfig {
        StreamConfig::new("NETBOX", vec!["NETBOX.*".to_string()])
    }

    async fn log_with_stream() -> MemoryLog {
        let log = MemoryLog::new();
        log.ensure_stream(&netbox_stream()).await.unwrap();
        log
    }

    async fn publish(log: &MemoryLog, subject: &str, body: &'static str) -> u64 {
        log.publish(subject, Bytes::from_static(body.as_bytes()))
            .await
            .unwrap()
            .sequence
    }

    #[tokio::test]
    async fn test_ensure_stream_is_idempotent() {
        let log = MemoryLog::new();
        let config = netbox_stream().max_age(Duration::from_secs(3600));

        assert_eq!(log.ensure_stream(&config).await.unwrap(), Provisioned::Created);
        publish(&log, "NETBOX.device", "{}").await;

        assert_eq!(
            log.ensure_stream(&config).await.unwrap(),
            Provisioned::Unchanged
        );
        let info = log.stream_info("NETBOX").unwrap();
        assert_eq!(info.config, config);
        assert_eq!(info.messages, 1);

        let widened = StreamConfig::new("NETBOX", vec!["NETBOX.*.*".to_string()]);
        assert_eq!(
            log.ensure_stream(&widened).await.unwrap(),
            Provisioned::Updated
        );
        assert_eq!(log.stream_info("NETBOX").unwrap().config, widened);
        assert_eq!(log.stream_info("NETBOX").unwrap().messages, 1);
    }

    #[tokio::test]
    async fn test_overlapping_streams_rejected() {
        let log = log_with_stream().await;
        let other = StreamConfig::new("DCIM", vec!["NETBOX.device".to_string()]);
        let err = log.ensure_stream(&other).await.unwrap_err();
        assert!(matches!(err, LogError::SubjectOverlap { .. }));
    }

    #[tokio::test]
    async fn test_invalid_stream_rejected() {
        let log = MemoryLog::new();
        assert!(log.ensure_stream(&StreamConfig::new("", vec!["A".into()])).await.is_err());
        assert!(log.ensure_stream(&StreamConfig::new("A", vec![])).await.is_err());
        assert!(log.ensure_stream(&StreamConfig::new("A", vec!["A..b".into()])).await.is_err());
    }

    #[tokio::test]
    async fn test_publish_without_stream() {
        let log = log_with_stream().await;
        let err = log
            .publish("OTHER.device", Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert_eq!(err, LogError::NoStream("OTHER.device".to_string()));

        let err = log
            .publish("NETBOX.*", Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, LogError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_cursor_filters_and_orders() {
        let log = log_with_stream().await;
        publish(&log, "NETBOX.device", "d1").await;
        publish(&log, "NETBOX.interface", "i1").await;
        publish(&log, "NETBOX.device", "d2").await;

        let cursor = log
            .cursor(&CursorConfig::new("NETBOX", "ironic-device", "NETBOX.device"))
            .await
            .unwrap();
        let batch = cursor.fetch(10, Duration::from_millis(10)).await.unwrap();
        let bodies: Vec<_> = batch.iter().map(|m| m.payload.clone()).collect();
        assert_eq!(bodies, vec![Bytes::from("d1"), Bytes::from("d2")]);
        assert_eq!(batch[0].info.delivered, 1);
        assert!(batch[0].info.stream_sequence < batch[1].info.stream_sequence);
    }

    #[tokio::test]
    async fn test_cursor_rejects_foreign_filter() {
        let log = log_with_stream().await;
        let result = log
            .cursor(&CursorConfig::new("NETBOX", "x-device", "OTHER.device"))
            .await;
        assert!(matches!(result, Err(LogError::InvalidConfig(_))));

        let result = log
            .cursor(&CursorConfig::new("MISSING", "x-device", "NETBOX.device"))
            .await;
        assert!(matches!(result, Err(LogError::StreamNotFound(_))));
    }

    #[tokio::test]
    async fn test_fetch_respects_batch_size() {
        let log = log_with_stream().await;
        for _ in 0..5 {
            publish(&log, "NETBOX.device", "d").await;
        }
        let cursor = log
            .cursor(&CursorConfig::new("NETBOX", "c", "NETBOX.device"))
            .await
            .unwrap();
        assert_eq!(cursor.fetch(2, Duration::ZERO).await.unwrap().len(), 2);
        assert_eq!(cursor.fetch(10, Duration::ZERO).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_cursors_fan_out_independently() {
        let log = log_with_stream().await;
        publish(&log, "NETBOX.device", "d1").await;

        let a = log
            .cursor(&CursorConfig::new("NETBOX", "a-device", "NETBOX.device"))
            .await
            .unwrap();
        let b = log
            .cursor(&CursorConfig::new("NETBOX", "b-device", "NETBOX.device"))
            .await
            .unwrap();

        for msg in a.fetch(10, Duration::ZERO).await.unwrap() {
            msg.ack().await.unwrap();
        }
        let from_b = b.fetch(10, Duration::ZERO).await.unwrap();
        assert_eq!(from_b.len(), 1);

        assert_eq!(log.cursor_info("NETBOX", "a-device").unwrap().acked, 1);
        assert_eq!(log.cursor_info("NETBOX", "b-device").unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_durable_cursor_resumes() {
        let log = log_with_stream().await;
        publish(&log, "NETBOX.device", "d1").await;
        let config = CursorConfig::new("NETBOX", "ironic-device", "NETBOX.device");

        let cursor = log.cursor(&config).await.unwrap();
        for msg in cursor.fetch(10, Duration::ZERO).await.unwrap() {
            msg.ack().await.unwrap();
        }
        drop(cursor);

        publish(&log, "NETBOX.device", "d2").await;
        let cursor = log.cursor(&config).await.unwrap();
        let batch = cursor.fetch(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, Bytes::from("d2"));
    }

    #[tokio::test]
    async fn test_reopened_cursor_takes_new_settings() {
        let log = log_with_stream().await;
        publish(&log, "NETBOX.device", "d1").await;
        let config = CursorConfig::new("NETBOX", "ironic-device", "NETBOX.device");
        let cursor = log.cursor(&config).await.unwrap();
        for msg in cursor.fetch(10, Duration::ZERO).await.unwrap() {
            msg.ack().await.unwrap();
        }

        let widened = CursorConfig::new("NETBOX", "ironic-device", "NETBOX.*")
            .ack_wait(Duration::from_secs(5));
        log.cursor(&widened).await.unwrap();

        let info = log.cursor_info("NETBOX", "ironic-device").unwrap();
        assert_eq!(info.filter_subject, "NETBOX.*");
        assert_eq!(info.acked, 1);
        assert_eq!(info.next_sequence, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_message_is_redelivered() {
        let log = log_with_stream().await;
        publish(&log, "NETBOX.device", "d1").await;
        let cursor = log
            .cursor(
                &CursorConfig::new("NETBOX", "c", "NETBOX.device")
                    .ack_wait(Duration::from_secs(6)),
            )
            .await
            .unwrap();

        let first = cursor.fetch(1, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        drop(first);

        let again = cursor.fetch(1, Duration::from_secs(10)).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].info.delivered, 2);
        assert_eq!(log.cursor_info("NETBOX", "c").unwrap().redelivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_progress_extends_deadline() {
        let log = log_with_stream().await;
        publish(&log, "NETBOX.device", "d1").await;
        let cursor = log
            .cursor(
                &CursorConfig::new("NETBOX", "c", "NETBOX.device")
                    .ack_wait(Duration::from_secs(6)),
            )
            .await
            .unwrap();

        let mut batch = cursor.fetch(1, Duration::ZERO).await.unwrap();
        let msg = batch.pop().unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        msg.in_progress().await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert!(cursor.fetch(1, Duration::ZERO).await.unwrap().is_empty());
        msg.ack().await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(cursor.fetch(1, Duration::ZERO).await.unwrap().is_empty());
        let info = log.cursor_info("NETBOX", "c").unwrap();
        assert_eq!(info.acked, 1);
        assert_eq!(info.pending, 0);
    }

    #[tokio::test]
    async fn test_double_ack_counts_once() {
        let log = log_with_stream().await;
        publish(&log, "NETBOX.device", "d1").await;
        let cursor = log
            .cursor(&CursorConfig::new("NETBOX", "c", "NETBOX.device").ack_wait(Duration::ZERO))
            .await
            .unwrap();

        let first = cursor.fetch(1, Duration::ZERO).await.unwrap();
        let second = cursor.fetch(1, Duration::ZERO).await.unwrap();
        assert_eq!(second[0].info.delivered, 2);

        for msg in first.into_iter().chain(second) {
            msg.ack().await.unwrap();
        }
        assert_eq!(log.cursor_info("NETBOX", "c").unwrap().acked, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_evicts_old_messages() {
        let log = MemoryLog::new();
        log.ensure_stream(&netbox_stream().max_age(Duration::from_secs(3600)))
            .await
            .unwrap();
        publish(&log, "NETBOX.device", "old").await;

        tokio::time::sleep(Duration::from_secs(3601)).await;
        publish(&log, "NETBOX.device", "new").await;

        let info = log.stream_info("NETBOX").unwrap();
        assert_eq!(info.messages, 1);
        assert_eq!(info.first_sequence, 2);

        let cursor = log
            .cursor(&CursorConfig::new("NETBOX", "late", "NETBOX.device"))
            .await
            .unwrap();
        let batch = cursor.fetch(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, Bytes::from("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_times_out_empty() {
        let log = log_with_stream().await;
        let cursor = log
            .cursor(&CursorConfig::new("NETBOX", "c", "NETBOX.device"))
            .await
            .unwrap();

        let start = Instant::now();
        let batch = cursor.fetch(1, Duration::from_secs(5)).await.unwrap();
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_fetch_wakes_on_publish() {
        let log = log_with_stream().await;
        let cursor = log
            .cursor(&CursorConfig::new("NETBOX", "c", "NETBOX.device"))
            .await
            .unwrap();

        let publisher = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher
                .publish("NETBOX.device", Bytes::from_static(b"late"))
                .await
                .unwrap();
        });

        let batch = cursor.fetch(1, Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, Bytes::from("late"));
    }
}
