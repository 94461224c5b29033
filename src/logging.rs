//! Forwarding of application log events to the broker's log channel
//!
//! [`BrokerLogLayer`] sits on the tracing subscriber next to the console
//! formatter and hands every event to a [`LogForwarder`], which routes it as a
//! [`Payload::log`] once a router exists. Events from the modules that carry a
//! forwarded record to the broker are never forwarded, nor are events logged
//! with [`LOCAL_TARGET`], so a record cannot feed itself.

use crate::payload::Payload;
use crate::router::Router;
use std::fmt::{self, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Target for events that stay on the console
pub const LOCAL_TARGET: &str = "serial_gateway::local";

const FORWARDING_PATH: [&str; 3] = [
    "serial_gateway::router",
    "serial_gateway::broker",
    "serial_gateway::logging",
];

/// Records held while the forwarder is busy or not running yet
const BUFFERED_RECORDS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub text: String,
}

pub struct BrokerLogLayer {
    sender: mpsc::Sender<LogRecord>,
}

pub struct LogForwarder {
    receiver: mpsc::Receiver<LogRecord>,
}

pub fn broker_log_layer() -> (BrokerLogLayer, LogForwarder) {
    let (sender, receiver) = mpsc::channel(BUFFERED_RECORDS);
    (BrokerLogLayer { sender }, LogForwarder { receiver })
}

fn is_forwarded(target: &str) -> bool {
    target != LOCAL_TARGET && !FORWARDING_PATH.iter().any(|t| target.starts_with(t))
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: String,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for BrokerLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !is_forwarded(metadata.target()) {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        let record = LogRecord {
            level: *metadata.level(),
            text: format!(
                "{} {}: {}{}",
                metadata.level(),
                metadata.target(),
                visitor.message,
                visitor.fields
            ),
        };

        // a full buffer drops the record, the console still has it
        let _ = self.sender.try_send(record);
    }
}

impl LogForwarder {
    /// Routes records at least as severe as `min_level` until cancelled or
    /// until the layer is gone
    pub async fn run(mut self, router: Arc<Router>, min_level: Level, cancel: CancellationToken) {
        loop {
            let record = tokio::select! {
                _ = cancel.cancelled() => break,
                record = self.receiver.recv() => record,
            };

            match record {
                Some(record) if record.level <= min_level => {
                    router.classify_and_route(Payload::log(record.text)).await;
                }
                Some(_) => {}
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{Destination, RouteTable, RouterSettings};
    use tracing_subscriber::layer::SubscriberExt;

    const LINK: &str = "serial_gateway::serial::link";

    fn emit(layer: BrokerLogLayer, events: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, events);
    }

    fn log_texts(payloads: Vec<Payload>) -> Vec<String> {
        payloads
            .into_iter()
            .filter_map(|payload| match payload {
                Payload::LogEntry(entry) => Some(entry.data),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn events_become_log_payloads() {
        let (layer, forwarder) = broker_log_layer();
        emit(layer, || {
            tracing::warn!(target: LINK, port = "/dev/ttyACM0", "device gone");
            tracing::info!(target: LINK, "link open");
        });

        let router = Arc::new(Router::default());
        forwarder
            .run(router.clone(), Level::INFO, CancellationToken::new())
            .await;

        let logs = log_texts(router.drain_for(Destination::Broker).await);
        assert_eq!(logs.len(), 2);
        assert!(logs[0].starts_with("WARN"));
        assert!(logs[0].contains("device gone"));
        assert!(logs[0].contains("port=/dev/ttyACM0"));
        assert!(logs[1].contains("link open"));
    }

    #[tokio::test]
    async fn less_severe_events_are_not_routed() {
        let (layer, forwarder) = broker_log_layer();
        emit(layer, || {
            tracing::info!(target: LINK, "chatter");
            tracing::error!(target: LINK, "broken");
        });

        let router = Arc::new(Router::default());
        forwarder
            .run(router.clone(), Level::WARN, CancellationToken::new())
            .await;

        let logs = log_texts(router.drain_for(Destination::Broker).await);
        assert_eq!(logs.len(), 1);
        assert!(logs[0].contains("broken"));
    }

    #[tokio::test]
    async fn forwarding_path_events_stay_local() {
        let (layer, forwarder) = broker_log_layer();
        emit(layer, || {
            tracing::warn!(target: LOCAL_TARGET, "console only");
            tracing::warn!(target: "serial_gateway::router", "queue full");
            tracing::warn!(target: "serial_gateway::broker::gateway", "dropping");
        });

        let router = Arc::new(Router::default());
        forwarder
            .run(router.clone(), Level::TRACE, CancellationToken::new())
            .await;

        assert!(router.drain_for(Destination::Broker).await.is_empty());
    }

    #[tokio::test]
    async fn saturated_router_does_not_feed_back() {
        let (layer, forwarder) = broker_log_layer();
        let router = Arc::new(Router::new(
            RouteTable::default(),
            RouterSettings {
                queue_capacity: 1,
                ..RouterSettings::default()
            },
        ));

        let subscriber = tracing_subscriber::registry().with(layer);
        let _guard = tracing::subscriber::set_default(subscriber);
        tracing::warn!(target: LINK, "first");
        tracing::warn!(target: LINK, "second");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(forwarder.run(router.clone(), Level::WARN, cancel.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap();

        let logs = log_texts(router.drain_for(Destination::Broker).await);
        assert_eq!(logs.len(), 1);
        assert!(logs[0].contains("first"));
    }
}
