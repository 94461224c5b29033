//! Dispatch core of the gateway
//!
//! The router owns one bounded FIFO queue per [`Destination`] and a static
//! [`RouteTable`]. Producers call [`Router::classify_and_route`]; each consumer
//! task takes a consistent snapshot of its queue once per tick with
//! [`Router::drain_for`].
//!
//! ```text
//! SerialLink ──► ┌────────┐ ──► broker queue   ──► BrokerGateway
//! Broker     ──► │ Router │ ──► hardware queue ──► SerialLink / PriorityOutbox
//! Timer      ──► └────────┘ ──► internal queue ──► Orchestrator status
//! ```
//!
//! The router also owns the configuration propagation timer, so an idle tick
//! still re-evaluates whether a [`ConfigEcho`](crate::payload::ConfigEcho) is due.

pub mod table;

pub use table::{Destination, RouteTable};

use crate::error::GatewayError;
use crate::payload::{DeviceConfig, Payload};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Settings for the router queues and the propagation timer
#[derive(Clone, Debug)]
pub struct RouterSettings {
    pub queue_capacity: usize,
    pub propagation_interval: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            propagation_interval: Duration::from_secs(30),
        }
    }
}

/// Result of routing a single payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Destinations that accepted the payload
    pub delivered: Vec<Destination>,
    /// Destinations whose queue was full, the payload was dropped there
    pub dropped: Vec<Destination>,
}

impl RouteOutcome {
    pub fn is_unrouted(&self) -> bool {
        self.delivered.is_empty() && self.dropped.is_empty()
    }
}

#[derive(Debug)]
pub struct Router {
    table: RouteTable,
    queues: HashMap<Destination, Mutex<VecDeque<Payload>>>,
    capacity: usize,
    propagation_interval: Duration,
    last_propagation: Mutex<Option<Instant>>,
}

impl Router {
    pub fn new(table: RouteTable, settings: RouterSettings) -> Self {
        info!(
            "Creating router with queue capacity {} and propagation interval {:?}",
            settings.queue_capacity, settings.propagation_interval
        );

        let queues = Destination::ALL
            .iter()
            .map(|d| {
                (
                    *d,
                    Mutex::new(VecDeque::with_capacity(settings.queue_capacity)),
                )
            })
            .collect();

        Self {
            table,
            queues,
            capacity: settings.queue_capacity,
            propagation_interval: settings.propagation_interval,
            last_propagation: Mutex::new(None),
        }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Enqueues the payload into every destination that allows its tag
    ///
    /// Never blocks and never fails: a saturated destination drops the payload
    /// and the drop is reported in the returned [`RouteOutcome`].
    pub async fn classify_and_route(&self, payload: Payload) -> RouteOutcome {
        let tag = payload.tag();
        let destinations = self.table.destinations_for(tag);
        let mut outcome = RouteOutcome::default();

        if destinations.is_empty() {
            debug!("No destination accepts {} payloads, dropping", tag);
            return outcome;
        }

        for destination in destinations {
            match self.enqueue(destination, payload.clone()).await {
                Ok(()) => outcome.delivered.push(destination),
                Err(e) => {
                    warn!("{}", e);
                    outcome.dropped.push(destination);
                }
            }
        }

        debug!(
            "Routed {} payload to {:?} (dropped at {:?})",
            tag, outcome.delivered, outcome.dropped
        );
        outcome
    }

    async fn enqueue(&self, destination: Destination, payload: Payload) -> Result<(), GatewayError> {
        let Some(queue) = self.queues.get(&destination) else {
            return Err(GatewayError::QueueFull {
                destination,
                tag: payload.tag(),
            });
        };

        let mut queue = queue.lock().await;
        if queue.len() >= self.capacity {
            return Err(GatewayError::QueueFull {
                destination,
                tag: payload.tag(),
            });
        }
        queue.push_back(payload);
        Ok(())
    }

    /// Atomically empties the queue of one destination, preserving order
    pub async fn drain_for(&self, destination: Destination) -> Vec<Payload> {
        match self.queues.get(&destination) {
            Some(queue) => {
                let mut queue = queue.lock().await;
                queue.drain(..).collect()
            }
            None => Vec::new(),
        }
    }

    /// Number of payloads currently waiting for a destination
    pub async fn pending(&self, destination: Destination) -> usize {
        match self.queues.get(&destination) {
            Some(queue) => queue.lock().await.len(),
            None => 0,
        }
    }

    /// Emits a config echo if the propagation interval has elapsed
    ///
    /// Returns whether an echo was emitted. The first call always fires.
    pub async fn maybe_propagate_config(&self, config: &DeviceConfig) -> bool {
        {
            let mut last = self.last_propagation.lock().await;
            if let Some(at) = *last {
                if at.elapsed() < self.propagation_interval {
                    return false;
                }
            }
            *last = Some(Instant::now());
        }

        debug!("Propagation interval elapsed, echoing config for {}", config.port);
        self.classify_and_route(Payload::config_echo(config.clone()))
            .await;
        true
    }

    /// Emits a config echo right away and restarts the propagation timer
    pub async fn propagate_config(&self, config: &DeviceConfig) -> RouteOutcome {
        *self.last_propagation.lock().await = Some(Instant::now());
        info!("Propagating config for {}", config.port);
        self.classify_and_route(Payload::config_echo(config.clone()))
            .await
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(RouteTable::default(), RouterSettings::default())
    }
}
