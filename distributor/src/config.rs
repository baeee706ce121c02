//! Configuration
//!
//! Two layers:
//! - [`Config`]: process settings from `DISTRIBUTOR_*` environment variables
//! - [`DestinationList`]: the destinations and what they watch, from YAML
//!
//! ```yaml
//! distributor_list:
//!   - name: ironic
//!     url: https://ironic.example.com/netbox
//!     region: eu
//!     netbox_webhooks:
//!       device: [created, updated]
//!       interface: [deleted]
//! ```

use crate::error::{DistributorError, Result};
use crate::subject::SubjectScheme;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration for the distributor process
#[derive(Debug, Clone)]
pub struct Config {
    /// Which parts of the pipeline this process runs
    pub role: Role,

    /// Webhook ingestion server address
    pub webhook_addr: SocketAddr,

    /// Metrics server address
    pub metrics_addr: SocketAddr,

    /// Destination list file
    pub config_file: PathBuf,

    /// NATS server, selects the JetStream log when set
    pub nats_url: Option<String>,

    /// Stream name in the durable log
    pub stream_name: String,

    /// Retention of the stream
    pub stream_max_age: Duration,

    pub subject_scheme: SubjectScheme,

    /// Messages fetched per pull
    pub batch_size: usize,

    /// Longest wait for a pull to return
    pub fetch_timeout: Duration,

    /// Ack deadline of the destination cursors
    pub ack_wait: Duration,

    /// Per-request timeout towards destinations
    pub dispatch_timeout: Duration,

    /// Log level
    pub log_level: String,

    /// Log format (json or pretty)
    pub log_format: LogFormat,
}

/// Process role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Ingestion server only
    Webhook,
    /// Consumers and metrics server only
    Distributor,
    /// Everything in one process
    All,
}

impl Role {
    pub fn runs_webhook(&self) -> bool {
        matches!(self, Role::Webhook | Role::All)
    }

    pub fn runs_distributor(&self) -> bool {
        matches!(self, Role::Distributor | Role::All)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "webhook" => Ok(Role::Webhook),
            "distributor" => Ok(Role::Distributor),
            "all" => Ok(Role::All),
            other => Err(format!(
                "unknown role '{other}' (expected 'webhook', 'distributor' or 'all')"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::All,
            webhook_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            config_file: PathBuf::from("./etc/config.yaml"),
            nats_url: None,
            stream_name: "NETBOX".to_string(),
            stream_max_age: Duration::from_secs(3600),
            subject_scheme: SubjectScheme::Object,
            batch_size: 1,
            fetch_timeout: Duration::from_secs(5),
            ack_wait: Duration::from_secs(30),
            dispatch_timeout: Duration::from_secs(5),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| DistributorError::Config(format!("invalid {key}: {e}")))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup, unset keys keep their default
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(role) = lookup("DISTRIBUTOR_ROLE") {
            config.role = parse("DISTRIBUTOR_ROLE", &role)?;
        }

        if let Some(addr) = lookup("DISTRIBUTOR_WEBHOOK_ADDR") {
            config.webhook_addr = parse("DISTRIBUTOR_WEBHOOK_ADDR", &addr)?;
        }

        if let Some(addr) = lookup("DISTRIBUTOR_METRICS_ADDR") {
            config.metrics_addr = parse("DISTRIBUTOR_METRICS_ADDR", &addr)?;
        }

        if let Some(path) = lookup("DISTRIBUTOR_CONFIG_FILE") {
            config.config_file = PathBuf::from(path);
        }

        config.nats_url = lookup("NATS_URL").filter(|url| !url.is_empty());

        if let Some(name) = lookup("DISTRIBUTOR_STREAM") {
            config.stream_name = name;
        }

        if let Some(secs) = lookup("DISTRIBUTOR_STREAM_MAX_AGE_SECS") {
            config.stream_max_age =
                Duration::from_secs(parse("DISTRIBUTOR_STREAM_MAX_AGE_SECS", &secs)?);
        }

        if let Some(scheme) = lookup("DISTRIBUTOR_SUBJECT_SCHEME") {
            config.subject_scheme = parse("DISTRIBUTOR_SUBJECT_SCHEME", &scheme)?;
        }

        if let Some(size) = lookup("DISTRIBUTOR_BATCH_SIZE") {
            config.batch_size = parse("DISTRIBUTOR_BATCH_SIZE", &size)?;
            if config.batch_size == 0 {
                return Err(DistributorError::Config(
                    "invalid DISTRIBUTOR_BATCH_SIZE: must be at least 1".to_string(),
                ));
            }
        }

        if let Some(ms) = lookup("DISTRIBUTOR_FETCH_TIMEOUT_MS") {
            config.fetch_timeout =
                Duration::from_millis(parse("DISTRIBUTOR_FETCH_TIMEOUT_MS", &ms)?);
        }

        if let Some(secs) = lookup("DISTRIBUTOR_ACK_WAIT_SECS") {
            config.ack_wait = Duration::from_secs(parse("DISTRIBUTOR_ACK_WAIT_SECS", &secs)?);
        }

        if let Some(secs) = lookup("DISTRIBUTOR_DISPATCH_TIMEOUT_SECS") {
            config.dispatch_timeout =
                Duration::from_secs(parse("DISTRIBUTOR_DISPATCH_TIMEOUT_SECS", &secs)?);
        }

        if let Some(level) = lookup("DISTRIBUTOR_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(format) = lookup("DISTRIBUTOR_LOG_FORMAT") {
            config.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(DistributorError::Config(format!(
                        "invalid DISTRIBUTOR_LOG_FORMAT: {other} (expected 'json' or 'pretty')"
                    )));
                }
            };
        }

        Ok(config)
    }
}

/// Event kinds a destination wants, per object type
pub type WatchList = BTreeMap<String, BTreeSet<String>>;

/// One downstream receiver
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Destination {
    /// Unique name, used for cursor names and metric labels
    pub name: String,

    /// Endpoint events are POSTed to
    pub url: String,

    /// Scoping label, used by the region subject scheme
    #[serde(default)]
    pub region: Option<String>,

    /// Object type to allowed event kinds
    #[serde(default, rename = "netbox_webhooks")]
    pub watch: WatchList,
}

impl Destination {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            region: None,
            watch: WatchList::new(),
        }
    }

    /// Watch `kinds` of `object_type`
    pub fn watch<I, S>(mut self, object_type: impl Into<String>, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watch
            .entry(object_type.into())
            .or_default()
            .extend(kinds.into_iter().map(Into::into));
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Whether `kind` events on `object_type` are delivered to this destination
    pub fn wants(&self, object_type: &str, kind: &str) -> bool {
        self.watch
            .get(object_type)
            .is_some_and(|kinds| kinds.contains(kind))
    }

    /// Watched object types, in stable order
    pub fn object_types(&self) -> impl Iterator<Item = &str> {
        self.watch.keys().map(String::as_str)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DistributorError::Config(
                "destination with empty name".to_string(),
            ));
        }
        let url = reqwest::Url::parse(&self.url).map_err(|e| {
            DistributorError::Config(format!(
                "destination '{}': invalid url '{}': {e}",
                self.name, self.url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DistributorError::Config(format!(
                "destination '{}': url must be http or https, got '{}'",
                self.name,
                url.scheme()
            )));
        }
        if let Some(object_type) = self.watch.keys().find(|k| k.trim().is_empty()) {
            return Err(DistributorError::Config(format!(
                "destination '{}': invalid object type '{object_type}'",
                self.name
            )));
        }
        Ok(())
    }
}

/// Destination list file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DestinationList {
    #[serde(default)]
    pub distributor_list: Vec<Destination>,
}

impl DestinationList {
    /// Load and validate the destination list from a YAML file
    ///
    /// An empty path yields an empty list.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            DistributorError::Config(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate the destination list from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut list: Self = serde_yaml::from_str(content)
            .map_err(|e| DistributorError::Config(format!("failed to parse config: {e}")))?;
        list.normalize();
        list.validate()?;
        Ok(list)
    }

    fn normalize(&mut self) {
        for destination in &mut self.distributor_list {
            if destination.region.as_deref().is_some_and(str::is_empty) {
                destination.region = None;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for destination in &self.distributor_list {
            destination.validate()?;
            if !seen.insert(destination.name.as_str()) {
                return Err(DistributorError::Config(format!(
                    "duplicate destination name '{}'",
                    destination.name
                )));
            }
        }
        Ok(())
    }
}
