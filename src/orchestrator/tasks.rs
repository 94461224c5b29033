//! The three long running tasks of a gateway
//!
//! All of them talk only through the router and stop when the shared
//! cancellation token fires.

use crate::broker::{BrokerGateway, BrokerInbound, BrokerTransport};
use crate::logging::LOCAL_TARGET;
use crate::outbox::{ControllerStatus, PriorityOutbox, Sentinels};
use crate::payload::{AppStatus, Payload};
use crate::router::{Destination, Router};
use crate::serial::SerialLink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::TimingSettings;

/// Upper bound of device lines handled per tick
const MAX_LINES_PER_TICK: usize = 64;

/// Sleeps for `duration`, returns false if cancelled first
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

pub(crate) struct HardwareTask {
    pub link: Arc<SerialLink>,
    pub router: Arc<Router>,
    pub sentinels: Sentinels,
    pub timing: TimingSettings,
    pub cancel: CancellationToken,
}

impl HardwareTask {
    pub async fn run(self) {
        info!("Hardware task started");
        let mut outbox = PriorityOutbox::new();
        let mut readiness = ControllerStatus::default();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let mut lost = false;
            for _ in 0..MAX_LINES_PER_TICK {
                match self.link.read().await {
                    Ok(Some(line)) => self.handle_line(&line, &mut readiness).await,
                    Ok(None) => break,
                    Err(e) if e.needs_reconnect() => {
                        warn!("{}", e);
                        lost = true;
                        break;
                    }
                    Err(e) => {
                        warn!("Unexpected serial error: {}", e);
                        break;
                    }
                }
            }

            // config updates apply whether or not the device is reachable
            self.drain_hardware(&mut outbox).await;

            if lost {
                readiness = ControllerStatus::default();
                if self.link.health_check().await {
                    self.report_recovered().await;
                } else if !self.recover(&mut outbox).await {
                    break;
                }
                continue;
            }

            let link = &self.link;
            outbox
                .flush(&mut readiness, |cmd| {
                    let line = serde_json::to_string(cmd);
                    async move {
                        match line {
                            Ok(line) => link.write(&line).await,
                            Err(e) => Err(e.into()),
                        }
                    }
                })
                .await;

            if !pause(&self.cancel, self.timing.tick_interval).await {
                break;
            }
        }

        info!("Hardware task stopped");
    }

    async fn handle_line(&self, line: &str, readiness: &mut ControllerStatus) {
        if line.trim().is_empty() {
            return;
        }

        if let Some(status) = self.sentinels.classify(line) {
            debug!("Device readiness now {:?}", status);
            *readiness = status;
            return;
        }

        let payload = Payload::from_device_line(line);
        if let Payload::LogEntry(entry) = &payload {
            warn!(target: LOCAL_TARGET, "{}", entry.data);
        }
        self.router.classify_and_route(payload).await;
    }

    async fn drain_hardware(&self, outbox: &mut PriorityOutbox) {
        for payload in self.router.drain_for(Destination::Hardware).await {
            self.apply(payload, outbox).await;
        }
    }

    async fn apply(&self, payload: Payload, outbox: &mut PriorityOutbox) {
        match payload {
            Payload::ConfigUpdate(update) => {
                info!("Applying device config from broker for {}", update.config.port);
                match self.link.update_config(update.config).await {
                    Ok(()) => {
                        let config = self.link.current_config();
                        self.router.propagate_config(&config).await;
                    }
                    Err(e) => {
                        error!(target: LOCAL_TARGET, "Failed to apply device config: {}", e);
                        self.router
                            .classify_and_route(Payload::log(format!(
                                "Failed to apply device config: {}",
                                e
                            )))
                            .await;
                    }
                }
            }
            Payload::CommandData(cmd) => {
                let id = cmd.id;
                if let Err(e) = outbox.offer(cmd) {
                    warn!("Command {} rejected: {}", id, e);
                }
            }
            other => debug!("Hardware has no use for {} payloads", other.tag()),
        }
    }

    async fn report_recovered(&self) {
        info!("Serial link recovered on {}", self.link.current_config().port);
        self.router
            .classify_and_route(Payload::status(AppStatus::Running))
            .await;
    }

    /// Backs off, then reconnects with a config that arrived meanwhile or
    /// with a rediscovered one
    ///
    /// Returns false when cancelled while waiting.
    async fn recover(&self, outbox: &mut PriorityOutbox) -> bool {
        self.router
            .classify_and_route(Payload::status(AppStatus::Failing))
            .await;

        info!(
            "Reconnecting to serial device in {:?}",
            self.timing.reconnect_backoff
        );
        if !pause(&self.cancel, self.timing.reconnect_backoff).await {
            return false;
        }

        self.drain_hardware(outbox).await;
        if self.link.health_check().await {
            self.report_recovered().await;
            return true;
        }

        let config = self.link.discover().await;
        match self.link.update_config(config).await {
            Ok(()) if self.link.health_check().await => self.report_recovered().await,
            Ok(()) => warn!("Serial link reopened but reports unhealthy"),
            Err(e) => warn!("Reconnect failed: {}", e),
        }
        true
    }
}

pub(crate) async fn run_broker_task<T, I>(
    gateway: Arc<BrokerGateway<T>>,
    mut inbound: I,
    router: Arc<Router>,
    timing: TimingSettings,
    cancel: CancellationToken,
) where
    T: BrokerTransport,
    I: BrokerInbound,
{
    info!("Broker task started");

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = inbound.next_message() => message,
        };

        match message {
            Ok(Some(message)) => {
                if let Some(payload) = gateway.handle_message(&message.channel, &message.body) {
                    router.classify_and_route(payload).await;
                }
            }
            Ok(None) => {
                info!("Broker inbound closed");
                break;
            }
            Err(e) => {
                warn!("{}", e);
                if !pause(&cancel, timing.reconnect_backoff).await {
                    break;
                }
            }
        }
    }

    info!("Broker task stopped");
}

pub(crate) async fn run_dispatch_task<T: BrokerTransport>(
    gateway: Arc<BrokerGateway<T>>,
    link: Arc<SerialLink>,
    router: Arc<Router>,
    status: watch::Sender<AppStatus>,
    timing: TimingSettings,
    cancel: CancellationToken,
) {
    info!("Dispatch task started");

    loop {
        let config = link.current_config();
        router.maybe_propagate_config(&config).await;

        for payload in router.drain_for(Destination::Broker).await {
            if let Err(e) = gateway.publish(&payload).await {
                warn!(target: LOCAL_TARGET, "Dropping {} payload: {}", payload.tag(), e);
            }
        }

        for payload in router.drain_for(Destination::Internal).await {
            match payload {
                Payload::StatusUpdate(update) => {
                    let previous = status.send_replace(update.status);
                    if previous != update.status {
                        info!("Gateway status {} -> {}", previous, update.status);
                    }
                }
                other => debug!("Ignoring internal {} payload", other.tag()),
            }
        }

        if !pause(&cancel, timing.tick_interval).await {
            break;
        }
    }

    info!("Dispatch task stopped");
}
