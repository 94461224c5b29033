mod common;

use common::{eventually, start, FALLBACK_PORT, VALID_LINE};
use serial_gateway::payload::{AppStatus, ConfigEcho, DeviceConfig};
use serial_gateway::serial::{ConfigStore, ConnectionState, MockDriver};
use std::time::Duration;

fn arduino() -> MockDriver {
    let driver = MockDriver::new();
    driver.add_port(FALLBACK_PORT, "Arduino Uno");
    driver
}

#[tokio::test]
async fn device_telemetry_reaches_the_broker() {
    let h = start(arduino(), tempfile::tempdir().unwrap()).await;

    h.driver.push_line(VALID_LINE);
    assert!(eventually(|| h.broker.published_on("telemetry").len() == 1).await);

    let body: serde_json::Value =
        serde_json::from_str(&h.broker.published_on("telemetry")[0]).unwrap();
    assert_eq!(body["controller_watts"], 10);
    assert_eq!(body["MPPT_volts"], 36.5);
    assert!(body["created_at"].is_string());
    assert!(h.broker.published_on("log").is_empty());

    h.handle.shutdown().await;
}

#[tokio::test]
async fn broken_device_line_is_forwarded_as_log() {
    let h = start(arduino(), tempfile::tempdir().unwrap()).await;

    h.driver.push_line("not json");
    assert!(eventually(|| !h.broker.published_on("log").is_empty()).await);

    let logs = h.broker.published_on("log");
    assert_eq!(logs.len(), 1);
    assert!(logs[0].contains("not json"));
    assert!(h.broker.published_on("telemetry").is_empty());

    h.handle.shutdown().await;
}

#[tokio::test]
async fn startup_statuses_are_published() {
    let h = start(arduino(), tempfile::tempdir().unwrap()).await;
    let status = h.handle.status();

    assert!(eventually(|| h.broker.published_on("status_update").len() >= 2).await);
    let statuses = h.broker.published_on("status_update");
    assert!(statuses[0].contains(r#""starting""#));
    assert!(statuses[1].contains(r#""running""#));
    assert!(eventually(|| *status.borrow() == AppStatus::Running).await);

    h.handle.shutdown().await;
}

#[tokio::test]
async fn config_message_reconnects_and_echoes() {
    let driver = arduino();
    driver.add_port("/dev/ttyACM1", "Arduino Mega");
    let h = start(driver, tempfile::tempdir().unwrap()).await;

    assert!(h.broker.inject("config", r#"{"port": "/dev/ttyACM1", "baudrate": 9600}"#));

    let expected = DeviceConfig {
        baudrate: 9600,
        ..DeviceConfig::new("/dev/ttyACM1")
    };
    assert!(
        eventually(|| h
            .broker
            .published_on("config_apply")
            .iter()
            .filter_map(|body| serde_json::from_str::<ConfigEcho>(body).ok())
            .any(|echo| echo.config == expected))
        .await
    );
    assert_eq!(h.driver.opened_configs().last(), Some(&expected));
    assert_eq!(h.handle.link().current_config(), expected);

    let persisted = ConfigStore::new(h.store_path()).load().await;
    assert_eq!(persisted, Some(expected));

    h.handle.shutdown().await;
}

#[tokio::test]
async fn invalid_config_message_is_dropped() {
    let h = start(arduino(), tempfile::tempdir().unwrap()).await;
    let opens = h.driver.opened_configs().len();

    assert!(h.broker.inject("config", r#"{"baudrate": "fast"}"#));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.driver.opened_configs().len(), opens);
    assert_eq!(h.handle.link().current_config().port, FALLBACK_PORT);

    h.handle.shutdown().await;
}

#[tokio::test]
async fn config_echo_is_emitted_without_traffic() {
    let h = start(arduino(), tempfile::tempdir().unwrap()).await;

    assert!(eventually(|| h.broker.published_on("config_apply").len() == 1).await);
    let echo: ConfigEcho =
        serde_json::from_str(&h.broker.published_on("config_apply")[0]).unwrap();
    assert_eq!(echo.config.port, FALLBACK_PORT);

    h.handle.shutdown().await;
}

#[tokio::test]
async fn commands_wait_for_the_device_to_ask() {
    let h = start(arduino(), tempfile::tempdir().unwrap()).await;

    let command = |id: u64| format!(r#"{{"id": {}, "priority": "low", "payload": {{"lat": 1.5}}}}"#, id);

    assert!(h.broker.inject("land_queue", command(1)));
    assert!(eventually(|| h.driver.written_lines().len() == 1).await);
    assert!(h.driver.written_lines()[0].contains(r#""id":1"#));

    assert!(h.broker.inject("land_queue", command(2)));
    assert!(h.broker.inject("land_queue", command(3)));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.driver.written_lines().len(), 1);

    h.driver.push_line("Got a new Payload");
    h.driver.push_line("Waiting for a new Payload");
    assert!(eventually(|| h.driver.written_lines().len() == 2).await);
    // only the latest pending command survives
    assert!(h.driver.written_lines()[1].contains(r#""id":3"#));
    assert!(h.broker.published_on("log").is_empty());

    h.handle.shutdown().await;
}

#[tokio::test]
async fn high_priority_commands_are_not_sent() {
    let h = start(arduino(), tempfile::tempdir().unwrap()).await;

    assert!(h.broker.inject(
        "land_queue",
        r#"{"id": 9, "priority": "high", "payload": {}}"#
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.driver.written_lines().is_empty());

    h.driver.push_line(VALID_LINE);
    assert!(eventually(|| h.broker.published_on("telemetry").len() == 1).await);

    h.handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_the_link() {
    let h = start(arduino(), tempfile::tempdir().unwrap()).await;
    let link = h.handle.link().clone();
    assert!(link.health_check().await);

    h.handle.shutdown().await;
    assert_eq!(link.state().await, ConnectionState::Closed);
    assert!(!link.health_check().await);
}

#[tokio::test]
async fn slow_device_reads_do_not_hold_up_publishing() {
    let driver = arduino();
    driver.set_read_delay(Duration::from_millis(800));
    let h = start(driver, tempfile::tempdir().unwrap()).await;

    let published = tokio::time::timeout(Duration::from_millis(400), async {
        while h.broker.published_on("config_apply").is_empty()
            || h.broker.published_on("status_update").len() < 2
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(published.is_ok());

    h.handle.shutdown().await;
}
