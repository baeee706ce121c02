//! Distributor - starts and supervises the consumer tasks
//!
//! The Distributor builds one [`Consumer`] per destination and spawns one task
//! per `(destination, objectType)` pair. All tasks share a cancellation token
//! and are joined on shutdown.
//!
//! # Example
//!
//! ```ignore
//! let shutdown = CancellationToken::new();
//! let running = Distributor::new(log, emitter, registry)
//!     .options(ConsumerOptions::default())
//!     .destinations(list.distributor_list)
//!     .start(shutdown.clone())?;
//!
//! shutdown_signal().await;
//! shutdown.cancel();
//! running.join().await;
//! ```
//!
//! # Architecture
//!
//! ```text
//!                    ┌─► ironic-device    ──► https://ironic/...
//! Durable Log ───────┼─► ironic-interface ──► https://ironic/...
//!                    └─► cmdb-device      ──► http://cmdb/...
//! ```

use crate::config::Destination;
use crate::consumer::{Consumer, ConsumerOptions};
use crate::emit::Emitter;
use crate::error::{DistributorError, Result};
use crate::log::DurableLog;
use crate::subject;
use prometheus::Registry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Builder for the set of consumer tasks
pub struct Distributor {
    log: Arc<dyn DurableLog>,
    emitter: Arc<dyn Emitter>,
    registry: Registry,
    options: ConsumerOptions,
    destinations: Vec<Destination>,
}

impl Distributor {
    /// Create a distributor with default options and no destinations
    pub fn new(log: Arc<dyn DurableLog>, emitter: Arc<dyn Emitter>, registry: Registry) -> Self {
        Self {
            log,
            emitter,
            registry,
            options: ConsumerOptions::default(),
            destinations: Vec::new(),
        }
    }

    /// Set the pull loop options shared by all consumers
    pub fn options(mut self, options: ConsumerOptions) -> Self {
        self.options = options;
        self
    }

    /// Add a destination
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }

    /// Add several destinations
    pub fn destinations(mut self, destinations: impl IntoIterator<Item = Destination>) -> Self {
        self.destinations.extend(destinations);
        self
    }

    /// Build every consumer, then spawn their tasks
    ///
    /// Nothing is spawned if any consumer fails to build or two
    /// `(destination, objectType)` pairs map to the same cursor.
    pub fn start(self, shutdown: CancellationToken) -> Result<RunningDistributor> {
        check_cursor_names(&self.destinations)?;

        let consumers = self
            .destinations
            .into_iter()
            .map(|destination| {
                Consumer::new(
                    destination,
                    Arc::clone(&self.log),
                    Arc::clone(&self.emitter),
                    &self.registry,
                    self.options.clone(),
                )
                .map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut tasks = JoinSet::new();
        for consumer in &consumers {
            let destination = consumer.destination();
            if destination.watch.is_empty() {
                warn!(destination = %destination.name, "Destination watches nothing");
            }

            for object_type in destination.object_types() {
                let consumer = Arc::clone(consumer);
                let object_type = object_type.to_string();
                let shutdown = shutdown.clone();
                tasks.spawn(async move {
                    let result = consumer.run(&object_type, shutdown).await;
                    TaskReport {
                        destination: consumer.destination().name.clone(),
                        object_type,
                        result,
                    }
                });
            }
        }

        info!(
            destinations = consumers.len(),
            tasks = tasks.len(),
            backend = self.log.name(),
            emitter = self.emitter.name(),
            "Distributor started"
        );

        Ok(RunningDistributor { tasks, consumers })
    }
}

/// Durable names are sanitized and joined with `-`, so distinct pairs can
/// collide (`a-b`/`c` and `a`/`b-c`). Colliding consumers would split events.
fn check_cursor_names(destinations: &[Destination]) -> Result<()> {
    let mut seen: HashMap<String, (&str, &str)> = HashMap::new();
    for destination in destinations {
        for object_type in destination.object_types() {
            let durable = subject::durable_name(&destination.name, object_type);
            if let Some((other, other_type)) =
                seen.insert(durable.clone(), (&destination.name, object_type))
            {
                return Err(DistributorError::Config(format!(
                    "cursor '{durable}' of destination '{}' ({object_type}) \
                     collides with destination '{other}' ({other_type})",
                    destination.name
                )));
            }
        }
    }
    Ok(())
}

struct TaskReport {
    destination: String,
    object_type: String,
    result: Result<()>,
}

/// Handle to the running consumer tasks
pub struct RunningDistributor {
    tasks: JoinSet<TaskReport>,
    consumers: Vec<Arc<Consumer>>,
}

impl RunningDistributor {
    /// Number of tasks still owned by this handle
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn consumers(&self) -> &[Arc<Consumer>] {
        &self.consumers
    }

    /// Consumer of a destination, by name
    pub fn consumer(&self, destination: &str) -> Option<&Arc<Consumer>> {
        self.consumers
            .iter()
            .find(|c| c.destination().name == destination)
    }

    /// Wait for every task to finish, returns how many failed
    ///
    /// Tasks only finish on their own when their cursor cannot be set up,
    /// otherwise they run until the shutdown token is cancelled.
    pub async fn join(mut self) -> usize {
        let mut failed = 0;
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(TaskReport {
                    result: Ok(()), ..
                }) => {}
                Ok(TaskReport {
                    destination,
                    object_type,
                    result: Err(e),
                }) => {
                    failed += 1;
                    error!(
                        destination = %destination,
                        object_type = %object_type,
                        error = %e,
                        "Consumer task failed"
                    );
                }
                Err(e) => {
                    failed += 1;
                    error!(error = %e, "Consumer task panicked");
                }
            }
        }
        info!(failed, "Distributor stopped");
        failed
    }
}
