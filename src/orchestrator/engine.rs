//! Lifecycle of a gateway as a typestate machine
//!
//! `Initializing` owns the wiring but no tasks, `Running` owns the spawned
//! tasks, `Stopped` is terminal.

use statum::{machine, state};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::tasks::{run_broker_task, run_dispatch_task, HardwareTask};
use super::OrchestratorSettings;
use crate::broker::{BrokerGateway, BrokerInbound, BrokerTransport};
use crate::error::GatewayError;
use crate::payload::{AppStatus, Payload};
use crate::router::Router;
use crate::serial::SerialLink;

#[state]
#[derive(Debug, Clone)]
pub enum GatewayState {
    Initializing,
    Running,
    Stopped,
}

#[machine]
pub struct Orchestrator<S: GatewayState> {
    link: Arc<SerialLink>,
    router: Arc<Router>,
    settings: OrchestratorSettings,
    status: watch::Sender<AppStatus>,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl<S: GatewayState> Orchestrator<S> {
    pub fn link(&self) -> &Arc<SerialLink> {
        &self.link
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn status(&self) -> watch::Receiver<AppStatus> {
        self.status.subscribe()
    }
}

impl Orchestrator<Initializing> {
    pub fn create(link: SerialLink, router: Router, settings: OrchestratorSettings) -> Self {
        info!("Creating gateway orchestrator with {:?}", settings.timing);
        let (status, _) = watch::channel(AppStatus::Starting);

        Self::new(
            Arc::new(link),
            Arc::new(router),
            settings,
            status,
            CancellationToken::new(),
            Vec::new(),
        )
    }

    /// Subscribes the broker, opens the device and spawns the tasks
    ///
    /// An unavailable device does not stop startup: the gateway reports
    /// `Failing` and the hardware task keeps trying to reconnect.
    pub async fn start<T, I>(
        mut self,
        mut gateway: BrokerGateway<T>,
        inbound: I,
    ) -> Result<Orchestrator<Running>, GatewayError>
    where
        T: BrokerTransport,
        I: BrokerInbound,
    {
        self.router
            .classify_and_route(Payload::status(AppStatus::Starting))
            .await;

        let handlers = gateway.default_handlers();
        gateway.subscribe(handlers).await?;

        let opened = match self.link.open().await {
            Ok(()) => AppStatus::Running,
            Err(e) => {
                warn!("Serial device unavailable at startup: {}", e);
                AppStatus::Failing
            }
        };
        self.router
            .classify_and_route(Payload::status(opened))
            .await;

        let gateway = Arc::new(gateway);
        let timing = self.settings.timing;

        let hardware = HardwareTask {
            link: self.link.clone(),
            router: self.router.clone(),
            sentinels: self.settings.sentinels.clone(),
            timing,
            cancel: self.cancel.clone(),
        };
        self.tasks.push(("hardware", tokio::spawn(hardware.run())));

        self.tasks.push((
            "broker",
            tokio::spawn(run_broker_task(
                gateway.clone(),
                inbound,
                self.router.clone(),
                timing,
                self.cancel.clone(),
            )),
        ));

        self.tasks.push((
            "dispatch",
            tokio::spawn(run_dispatch_task(
                gateway,
                self.link.clone(),
                self.router.clone(),
                self.status.clone(),
                timing,
                self.cancel.clone(),
            )),
        ));

        info!("Gateway running with {} tasks", self.tasks.len());
        Ok(self.transition())
    }
}

impl Orchestrator<Running> {
    /// Cancels every task, waits for them and closes the device
    pub async fn stop(mut self) -> Orchestrator<Stopped> {
        info!("Stopping gateway");
        self.cancel.cancel();

        for (name, task) in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("{} task ended abnormally: {}", name, e);
            }
        }

        self.link.close().await;
        info!("Gateway stopped");
        self.transition()
    }
}
