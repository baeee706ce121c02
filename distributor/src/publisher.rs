//! Publisher - writes ingested events to the durable log
//!
//! The stream is provisioned lazily on the first publish (or eagerly through
//! [`Publisher::ensure_provisioned`]) and only once per publisher.
//! Provisioning is get-or-create-or-reconcile, so any number of publishers
//! can start against the same log.
//!
//! # Example
//!
//! ```ignore
//! let publisher = Publisher::new(log, PublisherConfig::default());
//! publisher.ensure_provisioned().await?;
//! let receipt = publisher.publish(&event).await?;
//! ```

use crate::error::PublishError;
use crate::event::WebhookEvent;
use crate::log::{DurableLog, Provisioned, PublishReceipt, StreamConfig};
use crate::subject::{RegionStrategy, StripTrailingChar, SubjectScheme};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Publisher settings
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub stream_name: String,
    pub max_age: Duration,
    pub scheme: SubjectScheme,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            stream_name: "NETBOX".to_string(),
            max_age: Duration::from_secs(3600),
            scheme: SubjectScheme::Object,
        }
    }
}

impl PublisherConfig {
    /// Stream definition this publisher provisions
    pub fn stream(&self) -> StreamConfig {
        StreamConfig::new(self.stream_name.clone(), self.scheme.stream_subjects())
            .max_age(self.max_age)
    }
}

/// Writes [`WebhookEvent`]s to the log under their routing subject
pub struct Publisher {
    log: Arc<dyn DurableLog>,
    config: PublisherConfig,
    regions: Box<dyn RegionStrategy>,
    provisioned: OnceCell<Provisioned>,
}

impl Publisher {
    /// Create a publisher using the default region strategy
    pub fn new(log: Arc<dyn DurableLog>, config: PublisherConfig) -> Self {
        Self {
            log,
            config,
            regions: Box::new(StripTrailingChar),
            provisioned: OnceCell::new(),
        }
    }

    /// Replace the region strategy
    pub fn region_strategy<R: RegionStrategy + 'static>(mut self, regions: R) -> Self {
        self.regions = Box::new(regions);
        self
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Provision the stream unless this publisher already did
    pub async fn ensure_provisioned(&self) -> Result<Provisioned, PublishError> {
        self.provisioned
            .get_or_try_init(|| self.provision())
            .await
            .copied()
    }

    /// Create or reconcile the stream, regardless of earlier calls
    pub async fn provision(&self) -> Result<Provisioned, PublishError> {
        let stream = self.config.stream();
        let outcome = self
            .log
            .ensure_stream(&stream)
            .await
            .map_err(PublishError::Provision)?;

        info!(
            stream = %stream.name,
            subjects = ?stream.subjects,
            max_age_secs = stream.max_age.as_secs(),
            backend = self.log.name(),
            outcome = %outcome,
            "Stream provisioned"
        );
        Ok(outcome)
    }

    /// Subject `event` is published on
    pub fn subject_for(&self, event: &WebhookEvent) -> String {
        self.config
            .scheme
            .publish_subject(event, self.regions.as_ref())
    }

    /// Serialize and append an event
    pub async fn publish(&self, event: &WebhookEvent) -> Result<PublishReceipt, PublishError> {
        self.ensure_provisioned().await?;

        let subject = self.subject_for(event);
        let payload = event.to_bytes()?;

        let receipt = self
            .log
            .publish(&subject, payload)
            .await
            .map_err(|source| PublishError::Append {
                subject: subject.clone(),
                source,
            })?;

        debug!(
            subject = %subject,
            stream = %receipt.stream,
            sequence = receipt.sequence,
            "Event published"
        );
        Ok(receipt)
    }
}
