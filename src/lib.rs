//! Bidirectional gateway between one serial device and a publish/subscribe
//! broker.
//!
//! Device lines become telemetry and log payloads on the broker; config
//! requests and command data from the broker flow back down to the device.
//! Everything moves through the [`router::Router`]; the
//! [`orchestrator`] runs the tasks around it.

pub mod broker;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod outbox;
pub mod payload;
pub mod router;
pub mod serial;

pub use error::{GatewayError, Result};
