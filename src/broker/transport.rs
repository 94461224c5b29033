//! Broker client seam
//!
//! The gateway only needs two things from a broker: publishing a body on a
//! channel and subscribing to channels whose messages then arrive through a
//! [`BrokerInbound`]. [`MqttTransport`] and [`MqttInbound`] implement both on
//! top of `rumqttc`.

use super::config::BrokerSettings;
use crate::error::{GatewayError, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A message received on a subscribed channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: String,
    pub body: Vec<u8>,
}

impl InboundMessage {
    pub fn new(channel: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            body: body.into(),
        }
    }
}

/// Outgoing half of a broker connection
pub trait BrokerTransport: Send + Sync + 'static {
    fn publish(&self, channel: &str, body: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    fn subscribe(&self, channel: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Incoming half of a broker connection
pub trait BrokerInbound: Send + 'static {
    /// Waits for the next message, `Ok(None)` once the source is gone for good
    fn next_message(&mut self) -> impl Future<Output = Result<Option<InboundMessage>>> + Send;
}

#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    /// Creates the client and its event loop
    ///
    /// Nothing touches the network until [`MqttInbound::next_message`] is
    /// polled for the first time.
    pub fn connect(settings: &BrokerSettings) -> (Self, MqttInbound) {
        info!(
            "Creating MQTT client {} for {}:{}",
            settings.client_id, settings.host, settings.port
        );

        let mut options = MqttOptions::new(
            settings.client_id.clone(),
            settings.host.clone(),
            settings.port,
        );
        options
            .set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(1)))
            .set_clean_session(false);
        if let (Some(user), Some(password)) = (&settings.username, &settings.password) {
            options.set_credentials(user.clone(), password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, settings.request_capacity);
        (Self { client }, MqttInbound { eventloop })
    }
}

impl BrokerTransport for MqttTransport {
    /// Queues the message without waiting
    ///
    /// While the event loop is reconnecting the request queue fills up; a
    /// publish into a full queue fails instead of stalling the caller.
    async fn publish(&self, channel: &str, body: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(channel, QoS::AtMostOnce, false, body)
            .map_err(|e| GatewayError::Broker(format!("Publish on {} failed: {}", channel, e)))
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.client
            .subscribe(channel, QoS::AtMostOnce)
            .await
            .map_err(|e| GatewayError::Broker(format!("Subscribe to {} failed: {}", channel, e)))?;
        info!("Subscribed to {}", channel);
        Ok(())
    }
}

pub struct MqttInbound {
    eventloop: EventLoop,
}

impl BrokerInbound for MqttInbound {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(
                        "Received {} bytes on {}",
                        publish.payload.len(),
                        publish.topic
                    );
                    return Ok(Some(InboundMessage::new(
                        publish.topic,
                        publish.payload.to_vec(),
                    )));
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("Connected to broker: {:?}", ack.code);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Broker closed the connection");
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(GatewayError::Broker(format!("Connection error: {}", e)));
                }
            }
        }
    }
}
