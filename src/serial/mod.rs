//! # Serial Module
//!
//! Owns everything between the gateway and the physical device: opening and
//! discovering the port, splitting the byte stream into lines, and remembering
//! the last configuration that worked.
//!
//! ```text
//! serial/
//! ├── driver.rs       - SerialDriver / SerialHandle traits, serialport backend
//! ├── mock.rs         - in-memory driver for tests and dry runs
//! ├── line_buffer.rs  - line framing across partial reads
//! ├── store.rs        - persisted DeviceConfig (JSON file)
//! └── link.rs         - SerialLink, the connection used by the gateway
//! ```
//!
//! The link never retries on its own. A failed read surfaces as
//! [`GatewayError::Read`](crate::error::GatewayError::Read) and the caller
//! decides when to rediscover and reconnect.

pub mod driver;
pub mod line_buffer;
pub mod link;
pub mod mock;
pub mod store;

pub use driver::{PortDescriptor, SerialDriver, SerialHandle, SystemDriver};
pub use link::SerialLink;
pub use mock::MockDriver;
pub use store::ConfigStore;

use crate::payload::DeviceConfig;
use std::fmt;

/// Connection state of a [`SerialLink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Open,
    Discovering,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Discovering => write!(f, "discovering"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Config used when neither the persisted config nor a scan finds the
    /// device
    pub device: DeviceConfig,
    /// Substring looked for in port descriptions during discovery
    pub discovery_marker: String,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            device: DeviceConfig::new(default_port()),
            discovery_marker: "Arduino".to_string(),
        }
    }
}

/// Platform default device path
pub fn default_port() -> &'static str {
    if cfg!(windows) {
        "COM3"
    } else {
        "/dev/ttyACM0"
    }
}
