//! NetBox webhook distributor
//!
//! ## Usage
//!
//! ```bash
//! # Everything in one process, in-memory log
//! DISTRIBUTOR_CONFIG_FILE=./etc/config.yaml cargo run
//!
//! # Split deployment on NATS JetStream
//! NATS_URL=nats://nats:4222 DISTRIBUTOR_ROLE=webhook cargo run --features jetstream
//! NATS_URL=nats://nats:4222 DISTRIBUTOR_ROLE=distributor cargo run --features jetstream
//! ```
//!
//! ## Environment Variables
//!
//! - `DISTRIBUTOR_ROLE`: `all`, `webhook` or `distributor` (default: "all")
//! - `DISTRIBUTOR_WEBHOOK_ADDR`: Webhook server address (default: "0.0.0.0:8080")
//! - `DISTRIBUTOR_METRICS_ADDR`: Metrics server address (default: "0.0.0.0:8081")
//! - `DISTRIBUTOR_CONFIG_FILE`: Destination list (default: "./etc/config.yaml")
//! - `NATS_URL`: NATS server, requires the `jetstream` feature
//! - `DISTRIBUTOR_SUBJECT_SCHEME`: `object`, `object-kind` or `region` (default: "object")
//! - `DISTRIBUTOR_LOG_LEVEL`: Log level (default: "info")
//! - `DISTRIBUTOR_LOG_FORMAT`: `pretty` or `json` (default: "pretty")

use netbox_distributor::config::{Config, DestinationList, LogFormat};
use netbox_distributor::consumer::ConsumerOptions;
use netbox_distributor::distributor::Distributor;
use netbox_distributor::emit::WebhookEmitter;
use netbox_distributor::log::{DurableLog, MemoryLog};
use netbox_distributor::metrics::IngestMetrics;
use netbox_distributor::metrics_server::MetricsServer;
use netbox_distributor::publisher::{Publisher, PublisherConfig};
use netbox_distributor::retry::Backoff;
use netbox_distributor::server;
use prometheus::Registry;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!(
        role = ?config.role,
        webhook_addr = %config.webhook_addr,
        metrics_addr = %config.metrics_addr,
        stream = %config.stream_name,
        subject_scheme = %config.subject_scheme,
        "Starting NetBox distributor"
    );

    let log = connect_log(&config).await?;
    let metrics = Registry::new();
    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let metrics_handle =
        MetricsServer::start(config.metrics_addr, metrics.clone(), shutdown.clone());

    // Distribution side
    let mut running = None;
    if config.role.runs_distributor() {
        let destinations = DestinationList::from_file(&config.config_file)?;
        info!(
            file = %config.config_file.display(),
            destinations = destinations.distributor_list.len(),
            "Loaded destinations"
        );

        let emitter = WebhookEmitter::with_timeout(config.dispatch_timeout)?;
        let options = ConsumerOptions {
            stream: config.stream_name.clone(),
            scheme: config.subject_scheme,
            batch_size: config.batch_size,
            fetch_timeout: config.fetch_timeout,
            ack_wait: config.ack_wait,
            backoff: Backoff::default(),
            ..ConsumerOptions::default()
        };

        // Cursors need the stream to exist
        let publisher = Publisher::new(Arc::clone(&log), publisher_config(&config));
        publisher.ensure_provisioned().await?;

        running = Some(
            Distributor::new(Arc::clone(&log), Arc::new(emitter), metrics.clone())
                .options(options)
                .destinations(destinations.distributor_list)
                .start(shutdown.clone())?,
        );
    }

    // Ingestion side
    if config.role.runs_webhook() {
        let publisher = Arc::new(Publisher::new(Arc::clone(&log), publisher_config(&config)));
        publisher.ensure_provisioned().await?;

        let app = server::router(publisher, IngestMetrics::register(&metrics)?);
        server::serve(config.webhook_addr, app, shutdown.clone()).await?;
    } else {
        shutdown.cancelled().await;
    }

    if let Some(running) = running {
        running.join().await;
    }
    metrics_handle.await?;

    info!("NetBox distributor shutdown complete");
    Ok(())
}

fn publisher_config(config: &Config) -> PublisherConfig {
    PublisherConfig {
        stream_name: config.stream_name.clone(),
        max_age: config.stream_max_age,
        scheme: config.subject_scheme,
    }
}

#[cfg(feature = "jetstream")]
async fn connect_log(config: &Config) -> anyhow::Result<Arc<dyn DurableLog>> {
    use netbox_distributor::log::JetStreamLog;

    match &config.nats_url {
        Some(url) => Ok(Arc::new(JetStreamLog::connect(url).await?)),
        None => memory_log(config),
    }
}

#[cfg(not(feature = "jetstream"))]
async fn connect_log(config: &Config) -> anyhow::Result<Arc<dyn DurableLog>> {
    if config.nats_url.is_some() {
        anyhow::bail!("NATS_URL is set but this build has no `jetstream` feature");
    }
    memory_log(config)
}

fn memory_log(config: &Config) -> anyhow::Result<Arc<dyn DurableLog>> {
    if config.role != netbox_distributor::Role::All {
        anyhow::bail!(
            "role {:?} needs a shared log; set NATS_URL or use DISTRIBUTOR_ROLE=all",
            config.role
        );
    }
    info!("Using in-memory log, events do not survive restarts");
    Ok(Arc::new(MemoryLog::new()))
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }

    shutdown.cancel();
}
