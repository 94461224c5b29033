#![allow(dead_code)]

use serial_gateway::broker::{BrokerGateway, Channels, MemoryBroker};
use serial_gateway::orchestrator::{GatewayHandle, OrchestratorSettings, TimingSettings};
use serial_gateway::payload::DeviceConfig;
use serial_gateway::router::Router;
use serial_gateway::serial::{ConfigStore, MockDriver, SerialLink, SerialSettings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const VALID_LINE: &str = r#"{"controller_watts": 10, "time_to_go": 120, "controller_volts": 48.2, "MPPT_volts": 36.5, "MPPT_watts": 210.0, "motor_temp": 41.5, "motor_revols": 1200.0, "position_lat": 52.52, "position_lng": 13.405}"#;

pub const FALLBACK_PORT: &str = "/dev/ttyACM0";

pub struct Harness {
    pub driver: MockDriver,
    pub broker: MemoryBroker,
    pub handle: GatewayHandle,
    pub dir: TempDir,
}

impl Harness {
    pub fn store_path(&self) -> PathBuf {
        store_path(&self.dir)
    }
}

pub fn store_path(dir: &TempDir) -> PathBuf {
    dir.path().join("serial_config.json")
}

pub async fn start(driver: MockDriver, dir: TempDir) -> Harness {
    let link = SerialLink::new(
        Arc::new(driver.clone()),
        ConfigStore::new(store_path(&dir)),
        SerialSettings {
            device: DeviceConfig::new(FALLBACK_PORT),
            ..SerialSettings::default()
        },
    );
    let (broker, inbound) = MemoryBroker::new();
    let gateway = BrokerGateway::new(broker.clone(), Channels::default());
    let settings = OrchestratorSettings {
        timing: TimingSettings {
            reconnect_backoff: Duration::from_millis(50),
            tick_interval: Duration::from_millis(5),
        },
        ..OrchestratorSettings::default()
    };

    let handle = GatewayHandle::spawn(link, Router::default(), gateway, inbound, settings)
        .await
        .expect("gateway starts");

    Harness {
        driver,
        broker,
        handle,
        dir,
    }
}

/// Polls `check` for up to three seconds
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..300 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
