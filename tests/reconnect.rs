mod common;

use common::{eventually, start, store_path, FALLBACK_PORT, VALID_LINE};
use serial_gateway::payload::{AppStatus, DeviceConfig};
use serial_gateway::serial::{ConfigStore, MockDriver};
use std::time::Duration;

#[tokio::test]
async fn lost_device_is_rediscovered() {
    let driver = MockDriver::new();
    driver.add_port(FALLBACK_PORT, "Arduino Uno");
    let h = start(driver, tempfile::tempdir().unwrap()).await;
    let status = h.handle.status();
    assert!(eventually(|| *status.borrow() == AppStatus::Running).await);

    h.driver.disconnect();

    assert!(
        eventually(|| h
            .broker
            .published_on("status_update")
            .iter()
            .any(|s| s.contains(r#""failing""#)))
        .await
    );
    assert!(eventually(|| h.driver.opened_configs().len() >= 2).await);
    assert!(eventually(|| *status.borrow() == AppStatus::Running).await);

    h.driver.push_line(VALID_LINE);
    assert!(eventually(|| h.broker.published_on("telemetry").len() == 1).await);

    h.handle.shutdown().await;
}

#[tokio::test]
async fn missing_device_at_startup_is_picked_up_later() {
    let driver = MockDriver::new();
    let h = start(driver, tempfile::tempdir().unwrap()).await;
    let status = h.handle.status();

    assert!(eventually(|| *status.borrow() == AppStatus::Failing).await);

    h.driver.add_port("/dev/ttyACM7", "Arduino Nano");
    assert!(eventually(|| *status.borrow() == AppStatus::Running).await);
    assert_eq!(h.handle.link().current_config().port, "/dev/ttyACM7");

    h.handle.shutdown().await;
}

#[tokio::test]
async fn persisted_config_is_preferred_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let persisted = DeviceConfig {
        baudrate: 57_600,
        ..DeviceConfig::new("/dev/ttyUSB4")
    };
    tokio::fs::write(
        store_path(&dir),
        serde_json::to_vec(&persisted).unwrap(),
    )
    .await
    .unwrap();

    let driver = MockDriver::new();
    driver.add_port(FALLBACK_PORT, "Arduino Uno");
    driver.add_port("/dev/ttyUSB4", "FTDI FT232R");
    let h = start(driver, dir).await;

    assert_eq!(h.handle.link().current_config(), persisted);
    h.handle.shutdown().await;
}

#[tokio::test]
async fn corrupt_store_falls_back_to_scanning() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(store_path(&dir), b"{\"port\": 12").await.unwrap();

    let driver = MockDriver::new();
    driver.add_port("/dev/ttyS0", "16550A");
    driver.add_port("/dev/ttyACM3", "Arduino Leonardo");
    let h = start(driver, dir).await;

    assert_eq!(h.handle.link().current_config().port, "/dev/ttyACM3");
    h.handle.shutdown().await;
}

#[tokio::test]
async fn config_from_the_broker_reaches_a_missing_device() {
    let driver = MockDriver::new();
    driver.add_port("/dev/ttyUSB5", "FTDI FT232R");
    let h = start(driver, tempfile::tempdir().unwrap()).await;
    let status = h.handle.status();
    assert!(eventually(|| *status.borrow() == AppStatus::Failing).await);

    assert!(h.broker.inject("config", r#"{"port": "/dev/ttyUSB5"}"#));

    assert!(eventually(|| h.handle.link().current_config().port == "/dev/ttyUSB5").await);
    assert!(eventually(|| *status.borrow() == AppStatus::Running).await);
    assert!(h.handle.link().health_check().await);
    assert_eq!(
        ConfigStore::new(h.store_path()).load().await,
        Some(DeviceConfig::new("/dev/ttyUSB5"))
    );

    h.handle.shutdown().await;
}

#[tokio::test]
async fn unplugged_device_keeps_its_persisted_config() {
    let dir = tempfile::tempdir().unwrap();
    let persisted = DeviceConfig {
        baudrate: 57_600,
        ..DeviceConfig::new("/dev/ttyUSB4")
    };
    ConfigStore::new(store_path(&dir))
        .save(&persisted)
        .await
        .unwrap();

    let driver = MockDriver::new();
    driver.add_port("/dev/ttyUSB4", "FTDI FT232R");
    let h = start(driver, dir).await;
    let status = h.handle.status();
    assert!(eventually(|| *status.borrow() == AppStatus::Running).await);

    h.driver.set_reachable("/dev/ttyUSB4", false);
    h.driver.disconnect();
    assert!(eventually(|| *status.borrow() == AppStatus::Failing).await);
    // a few reconnect attempts against the unreachable fallback
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        ConfigStore::new(h.store_path()).load().await,
        Some(persisted.clone())
    );

    h.driver.set_reachable("/dev/ttyUSB4", true);
    assert!(eventually(|| *status.borrow() == AppStatus::Running).await);
    assert_eq!(h.handle.link().current_config(), persisted);

    h.handle.shutdown().await;
}
