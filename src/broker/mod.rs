//! # Broker Module
//!
//! Connects the router to the publish/subscribe broker.
//!
//! ```text
//! broker/
//! ├── config.rs     - BrokerSettings and channel names
//! ├── transport.rs  - BrokerTransport / BrokerInbound traits, rumqttc backend
//! ├── memory.rs     - in-memory broker for tests
//! └── gateway.rs    - BrokerGateway: payload ⇄ channel message
//! ```
//!
//! Delivery is at-most-once. A message that cannot be decoded is logged and
//! dropped; it never reaches the router.

pub mod config;
pub mod gateway;
pub mod memory;
pub mod transport;

pub use config::{BrokerSettings, Channels};
pub use gateway::{decode_command, decode_config_update, BrokerGateway, ChannelHandler};
pub use memory::{MemoryBroker, MemoryInbound};
pub use transport::{BrokerInbound, BrokerTransport, InboundMessage, MqttInbound, MqttTransport};
