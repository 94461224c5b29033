//! Error taxonomy shared by the gateway components
//!
//! Every failure that can happen inside a task is expressed as a
//! [`GatewayError`]. Tasks never let one of these cross their boundary: they log
//! it and turn it into a recovery action (reconnect) or a dropped unit of work.

use crate::payload::PayloadTag;
use crate::router::Destination;

/// Errors raised by the routing and connection fabric
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The serial handle was not open when a read was attempted
    ///
    /// Recoverable: the caller backs off, rediscovers the device and
    /// reconnects before trying again.
    #[error("Serial read failed: {0}")]
    Read(String),

    /// Opening or probing the serial device failed
    #[error("Serial open failed: {0}")]
    Open(String),

    /// The serial handle was not open when a write was attempted
    #[error("Serial write failed: {0}")]
    Write(String),

    /// Malformed JSON or a schema violation on serial or broker input
    #[error("Decode error: {0}")]
    Decode(String),

    /// A destination queue was saturated, the newest item was dropped
    #[error("Queue for {destination} is full, dropped {tag} payload")]
    QueueFull {
        destination: Destination,
        tag: PayloadTag,
    },

    /// Requested a code path that exists only as an extension point
    #[error("Not implemented: {0}")]
    Unimplemented(String),

    /// Reading or writing the persisted device configuration failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Publishing or subscribing on the broker failed
    #[error("Broker error: {0}")]
    Broker(String),

    /// Invalid gateway configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Whether the error means the serial link has to be re-established
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            GatewayError::Read(_) | GatewayError::Write(_) | GatewayError::Open(_)
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_link_errors_request_a_reconnect() {
        assert!(GatewayError::Read("closed".into()).needs_reconnect());
        assert!(GatewayError::Write("closed".into()).needs_reconnect());
        assert!(!GatewayError::Decode("bad json".into()).needs_reconnect());
        assert!(!GatewayError::Unimplemented("high priority".into()).needs_reconnect());
    }

    #[test]
    fn queue_full_names_destination_and_tag() {
        let err = GatewayError::QueueFull {
            destination: Destination::Broker,
            tag: PayloadTag::Telemetry,
        };
        assert_eq!(
            err.to_string(),
            "Queue for broker is full, dropped telemetry payload"
        );
    }
}
