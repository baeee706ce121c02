//! Prometheus metrics
//!
//! Every collector is registered on a [`Registry`] handed in by the caller,
//! never on the process-global default, so a second consumer with the same
//! name is a registration error instead of a silent merge.

use crate::error::{DistributorError, Result};
use prometheus::{Counter, CounterVec, Encoder, Opts, Registry, TextEncoder};

/// Per-destination delivery counters
///
/// Exposed as `distribution_success_total{consumer="<name>"}` and
/// `distribution_errors_total{consumer="<name>"}`.
#[derive(Clone)]
pub struct DistributionMetrics {
    success: Counter,
    errors: Counter,
}

impl DistributionMetrics {
    /// Register the counters for one destination
    ///
    /// Fails if counters for this destination already exist in `registry`.
    pub fn register(registry: &Registry, destination: &str) -> Result<Self> {
        let success = Counter::with_opts(
            Opts::new("success_total", "Total number of successful webhook distributions")
                .subsystem("distribution")
                .const_label("consumer", destination),
        )?;
        let errors = Counter::with_opts(
            Opts::new("errors_total", "Total number of failed webhook distributions")
                .subsystem("distribution")
                .const_label("consumer", destination),
        )?;

        registry
            .register(Box::new(success.clone()))
            .map_err(|e| DistributorError::Metrics(format!("distribution_success_total: {e}")))?;
        if let Err(e) = registry.register(Box::new(errors.clone())) {
            let _ = registry.unregister(Box::new(success.clone()));
            return Err(DistributorError::Metrics(format!(
                "distribution_errors_total: {e}"
            )));
        }

        Ok(Self { success, errors })
    }

    /// Record a delivered event
    pub fn record_success(&self) {
        self.success.inc();
    }

    /// Record an event that was dropped after a terminal failure or retry exhaustion
    pub fn record_error(&self) {
        self.errors.inc();
    }

    pub fn success_total(&self) -> u64 {
        self.success.get() as u64
    }

    pub fn errors_total(&self) -> u64 {
        self.errors.get() as u64
    }
}

/// Webhook ingestion counters
#[derive(Clone)]
pub struct IngestMetrics {
    received: CounterVec,
    publish_failures: Counter,
}

impl IngestMetrics {
    /// Register the ingestion counters
    pub fn register(registry: &Registry) -> Result<Self> {
        let received = CounterVec::new(
            Opts::new("received_total", "Total webhooks received").subsystem("webhook"),
            &["model", "event"],
        )?;
        let publish_failures = Counter::with_opts(
            Opts::new(
                "publish_failures_total",
                "Total webhooks that could not be decoded or published",
            )
            .subsystem("webhook"),
        )?;

        registry
            .register(Box::new(received.clone()))
            .map_err(|e| DistributorError::Metrics(format!("webhook_received_total: {e}")))?;
        registry
            .register(Box::new(publish_failures.clone()))
            .map_err(|e| {
                DistributorError::Metrics(format!("webhook_publish_failures_total: {e}"))
            })?;

        Ok(Self {
            received,
            publish_failures,
        })
    }

    /// Record an incoming webhook
    pub fn record_received(&self, model: &str, event: &str) {
        self.received.with_label_values(&[model, event]).inc();
    }

    /// Record a webhook answered with a server error
    pub fn record_failure(&self) {
        self.publish_failures.inc();
    }
}

/// Gather all metrics in `registry` as Prometheus text format
pub fn gather(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}
