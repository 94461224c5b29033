//! # Orchestrator Module
//!
//! Wires a [`SerialLink`](crate::serial::SerialLink), a
//! [`BrokerGateway`](crate::broker::BrokerGateway) and a
//! [`Router`](crate::router::Router) together and runs them as three tokio
//! tasks:
//!
//! ```text
//! hardware task  ─ device lines → router, hardware queue → link / outbox
//! broker task    ─ broker messages → router
//! dispatch task  ─ config echo timer, broker queue → publish,
//!                  internal queue → status watch channel
//! ```
//!
//! The tasks share nothing but the router and one cancellation token, and are
//! stopped together through [`GatewayHandle::shutdown`].

pub mod engine;
pub mod handle;
mod tasks;

pub use engine::{Initializing, Orchestrator, Running, Stopped};
pub use handle::GatewayHandle;

use crate::outbox::Sentinels;
use std::time::Duration;

/// Timing of the gateway tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSettings {
    /// Wait before rediscovering a lost device (and before retrying a
    /// failed broker connection)
    pub reconnect_backoff: Duration,
    /// Pause between two iterations of a task loop
    pub tick_interval: Duration,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_secs(5),
            tick_interval: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub timing: TimingSettings,
    pub sentinels: Sentinels,
}
