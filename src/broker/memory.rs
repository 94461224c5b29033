//! Broker stand-in that keeps everything in memory
//!
//! Records every publish and delivers injected messages to subscribed
//! channels only, the way a real broker would.

use super::transport::{BrokerInbound, BrokerTransport, InboundMessage};
use crate::error::{GatewayError, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug)]
struct MemoryState {
    published: Vec<InboundMessage>,
    subscriptions: Vec<String>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    fail_publish: bool,
}

#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
}

pub struct MemoryInbound {
    receiver: mpsc::UnboundedReceiver<InboundMessage>,
}

impl MemoryBroker {
    pub fn new() -> (Self, MemoryInbound) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let broker = Self {
            state: Arc::new(Mutex::new(MemoryState {
                published: Vec::new(),
                subscriptions: Vec::new(),
                inbound: sender,
                fail_publish: false,
            })),
        };
        (broker, MemoryInbound { receiver })
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Delivers a message from outside; returns false if nobody subscribed
    pub fn inject(&self, channel: &str, body: impl Into<Vec<u8>>) -> bool {
        let state = self.lock();
        if !state.subscriptions.iter().any(|c| c == channel) {
            debug!("Dropping message on unsubscribed channel {}", channel);
            return false;
        }
        state
            .inbound
            .send(InboundMessage::new(channel, body))
            .is_ok()
    }

    pub fn published(&self) -> Vec<InboundMessage> {
        self.lock().published.clone()
    }

    /// Bodies published on one channel, as text
    pub fn published_on(&self, channel: &str) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.channel == channel)
            .map(|m| String::from_utf8_lossy(&m.body).into_owned())
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }

    /// Makes every following publish fail
    pub fn set_fail_publish(&self, fail: bool) {
        self.lock().fail_publish = fail;
    }
}

impl BrokerTransport for MemoryBroker {
    async fn publish(&self, channel: &str, body: Vec<u8>) -> Result<()> {
        let mut state = self.lock();
        if state.fail_publish {
            return Err(GatewayError::Broker(format!(
                "Publish on {} rejected",
                channel
            )));
        }
        state.published.push(InboundMessage::new(channel, body));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.subscriptions.iter().any(|c| c == channel) {
            state.subscriptions.push(channel.to_string());
        }
        Ok(())
    }
}

impl BrokerInbound for MemoryInbound {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
        Ok(self.receiver.recv().await)
    }
}
