use color_eyre::{eyre::eyre, Result};
use serial_gateway::broker::{BrokerGateway, MqttTransport};
use serial_gateway::config::GatewayConfig;
use serial_gateway::logging::{broker_log_layer, BrokerLogLayer, LogForwarder};
use serial_gateway::orchestrator::GatewayHandle;
use serial_gateway::router::{RouteTable, Router};
use serial_gateway::serial::{SerialLink, SystemDriver};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let logs = setup()?;

    let path = GatewayConfig::resolve_path(std::env::args_os().nth(1).map(PathBuf::from));
    let config = GatewayConfig::load(&path)
        .await
        .map_err(|e| eyre!("Failed to load config: {}", e))?;
    info!(
        "Starting gateway: broker {}:{}, serial {}",
        config.broker.host, config.broker.port, config.serial.port
    );

    let link = SerialLink::new(
        Arc::new(SystemDriver::new()),
        config.config_store(),
        config.serial_settings(),
    );
    let router = Router::new(RouteTable::default(), config.router_settings());
    let (transport, inbound) = MqttTransport::connect(&config.broker);
    let gateway = BrokerGateway::new(transport, config.broker.channels.clone());

    let handle = GatewayHandle::spawn(
        link,
        router,
        gateway,
        inbound,
        config.orchestrator_settings(),
    )
    .await
    .map_err(|e| eyre!("Failed to start gateway: {}", e))?;

    let log_level = config
        .broker_log_level()
        .map_err(|e| eyre!("Invalid log level: {}", e))?;
    let logs_cancel = CancellationToken::new();
    let log_task = tokio::spawn(logs.run(
        handle.router().clone(),
        log_level,
        logs_cancel.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    logs_cancel.cancel();
    if let Err(e) = log_task.await {
        error!("Log forwarder ended abnormally: {}", e);
    }
    handle.shutdown().await;

    Ok(())
}

fn setup() -> Result<LogForwarder> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    let (layer, forwarder) = broker_log_layer();
    setup_logging_env(layer);
    Ok(forwarder)
}

fn setup_logging_env(broker_logs: BrokerLogLayer) {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .finish()
        .with(broker_logs)
        .init();
}
