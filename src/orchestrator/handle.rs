use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use super::engine::{Initializing, Orchestrator, Running};
use super::OrchestratorSettings;
use crate::broker::{BrokerGateway, BrokerInbound, BrokerTransport};
use crate::error::Result;
use crate::payload::AppStatus;
use crate::router::Router;
use crate::serial::SerialLink;

/// Handle to a running gateway
///
/// Dropping the handle leaves the tasks running; call
/// [`shutdown`](GatewayHandle::shutdown) to stop them.
pub struct GatewayHandle {
    orchestrator: Orchestrator<Running>,
}

impl GatewayHandle {
    /// Builds the orchestrator and starts every task
    ///
    /// # Errors
    ///
    /// Fails only if the broker subscriptions cannot be set up. A missing
    /// serial device is reported through [`status`](GatewayHandle::status)
    /// instead.
    pub async fn spawn<T, I>(
        link: SerialLink,
        router: Router,
        gateway: BrokerGateway<T>,
        inbound: I,
        settings: OrchestratorSettings,
    ) -> Result<Self>
    where
        T: BrokerTransport,
        I: BrokerInbound,
    {
        let orchestrator = Orchestrator::<Initializing>::create(link, router, settings)
            .start(gateway, inbound)
            .await?;
        Ok(Self { orchestrator })
    }

    /// Gateway status as last routed to the internal destination
    pub fn status(&self) -> watch::Receiver<AppStatus> {
        self.orchestrator.status()
    }

    pub fn link(&self) -> &Arc<SerialLink> {
        self.orchestrator.link()
    }

    pub fn router(&self) -> &Arc<Router> {
        self.orchestrator.router()
    }

    pub async fn shutdown(self) {
        let _stopped = self.orchestrator.stop().await;
        info!("Gateway handle released");
    }
}
