use super::config::Channels;
use super::transport::BrokerTransport;
use crate::error::{GatewayError, Result};
use crate::payload::{CommandData, DeviceConfig, Payload};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Decodes the body of a message received on one channel
pub type ChannelHandler = fn(&[u8]) -> Result<Payload>;

/// Inbound config requests carry a bare device config
pub fn decode_config_update(body: &[u8]) -> Result<Payload> {
    Ok(Payload::config_update(DeviceConfig::from_json(body)?))
}

pub fn decode_command(body: &[u8]) -> Result<Payload> {
    let command: CommandData = serde_json::from_slice(body)?;
    Ok(Payload::CommandData(command))
}

/// Translates between payloads and broker messages
pub struct BrokerGateway<T: BrokerTransport> {
    transport: T,
    channels: Channels,
    handlers: HashMap<String, ChannelHandler>,
}

impl<T: BrokerTransport> BrokerGateway<T> {
    pub fn new(transport: T, channels: Channels) -> Self {
        Self {
            transport,
            channels,
            handlers: HashMap::new(),
        }
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    /// `config` → config update, `land_queue` → command data
    pub fn default_handlers(&self) -> HashMap<String, ChannelHandler> {
        let mut handlers: HashMap<String, ChannelHandler> = HashMap::new();
        handlers.insert(self.channels.config.clone(), decode_config_update);
        handlers.insert(self.channels.land_queue.clone(), decode_command);
        handlers
    }

    /// Registers the handlers and subscribes to their channels
    ///
    /// Handlers for channels registered earlier are replaced.
    pub async fn subscribe(&mut self, handlers: HashMap<String, ChannelHandler>) -> Result<()> {
        for (channel, handler) in handlers {
            self.transport.subscribe(&channel).await?;
            self.handlers.insert(channel, handler);
        }
        info!("Listening on {} broker channels", self.handlers.len());
        Ok(())
    }

    /// Channel and wire form for a payload, `None` for inbound-only variants
    fn encode(&self, payload: &Payload) -> Result<Option<(&str, Vec<u8>)>> {
        let encoded = match payload {
            Payload::Telemetry(telemetry) => {
                (self.channels.telemetry.as_str(), serde_json::to_vec(telemetry)?)
            }
            Payload::ConfigEcho(echo) => {
                (self.channels.config_apply.as_str(), serde_json::to_vec(echo)?)
            }
            Payload::StatusUpdate(status) => (
                self.channels.status_update.as_str(),
                serde_json::to_vec(status)?,
            ),
            Payload::LogEntry(entry) => (self.channels.log.as_str(), entry.data.clone().into_bytes()),
            Payload::ConfigUpdate(_) | Payload::CommandData(_) => return Ok(None),
        };
        Ok(Some(encoded))
    }

    /// Publishes on the channel that belongs to the payload's variant
    pub async fn publish(&self, payload: &Payload) -> Result<()> {
        let Some((channel, body)) = self.encode(payload)? else {
            return Err(GatewayError::Broker(format!(
                "{} payloads have no outbound channel",
                payload.tag()
            )));
        };

        debug!("Publishing {} payload on {}", payload.tag(), channel);
        self.transport.publish(channel, body).await
    }

    /// Decodes a received message with the handler of its channel
    ///
    /// Unknown channels and undecodable bodies are logged and dropped.
    pub fn handle_message(&self, channel: &str, body: &[u8]) -> Option<Payload> {
        let Some(handler) = self.handlers.get(channel) else {
            warn!("No handler for broker channel {}, dropping message", channel);
            return None;
        };

        match handler(body) {
            Ok(payload) => {
                debug!("Decoded {} payload from {}", payload.tag(), channel);
                Some(payload)
            }
            Err(e) => {
                warn!(
                    "Dropping message on {}: {} ({})",
                    channel,
                    e,
                    String::from_utf8_lossy(body)
                );
                None
            }
        }
    }
}
