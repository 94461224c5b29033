//! Gateway configuration file
//!
//! A single TOML file with `[broker]`, `[serial]`, `[timing]`, `[router]`
//! and `[logging]` sections. Every key is optional. Selected keys can be overridden from the
//! environment for deployments where editing the file is awkward:
//!
//! | Variable                  | Key              |
//! |---------------------------|------------------|
//! | `GATEWAY_BROKER_HOST`     | `broker.host`    |
//! | `GATEWAY_BROKER_PORT`     | `broker.port`    |
//! | `GATEWAY_SERIAL_PORT`     | `serial.port`    |
//! | `GATEWAY_SERIAL_BAUDRATE` | `serial.baudrate`|

use crate::broker::BrokerSettings;
use crate::error::{GatewayError, Result};
use crate::orchestrator::{OrchestratorSettings, TimingSettings};
use crate::outbox::Sentinels;
use crate::payload::{DeviceConfig, Parity};
use crate::router::RouterSettings;
use crate::serial::{default_port, ConfigStore, SerialSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, Level};

pub const CONFIG_ENV: &str = "SERIAL_GATEWAY_CONFIG";
const CONFIG_DIR: &str = "serial-gateway";
const CONFIG_FILE: &str = "gateway.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSection {
    pub port: String,
    pub baudrate: u32,
    pub bytesize: u8,
    pub parity: Parity,
    pub stopbits: u8,
    /// Read timeout in seconds, `0` polls
    pub timeout: Option<u64>,
    pub discovery_marker: String,
    pub payload_request: String,
    pub payload_received: String,
    /// Where the last applied device config is kept
    pub store_path: Option<PathBuf>,
}

impl Default for SerialSection {
    fn default() -> Self {
        let device = DeviceConfig::new(default_port());
        let sentinels = Sentinels::default();
        Self {
            port: device.port,
            baudrate: device.baudrate,
            bytesize: device.bytesize,
            parity: device.parity,
            stopbits: device.stopbits,
            timeout: device.timeout,
            discovery_marker: SerialSettings::default().discovery_marker,
            payload_request: sentinels.payload_request,
            payload_received: sentinels.payload_received,
            store_path: None,
        }
    }
}

impl SerialSection {
    pub fn device(&self) -> DeviceConfig {
        DeviceConfig {
            port: self.port.clone(),
            baudrate: self.baudrate,
            bytesize: self.bytesize,
            parity: self.parity,
            stopbits: self.stopbits,
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub reconnect_backoff_secs: u64,
    pub config_propagation_secs: u64,
    pub tick_interval_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            reconnect_backoff_secs: 5,
            config_propagation_secs: 30,
            tick_interval_ms: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    pub queue_capacity: usize,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            queue_capacity: RouterSettings::default().queue_capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Least severe level sent to the broker's log channel
    pub broker_level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            broker_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub broker: BrokerSettings,
    pub serial: SerialSection,
    pub timing: TimingSection,
    pub router: RouterSection,
    pub logging: LoggingSection,
}

impl GatewayConfig {
    /// `<config dir>/serial-gateway/gateway.toml`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Explicit path, else `$SERIAL_GATEWAY_CONFIG`, else the default path
    pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(Self::default_path)
    }

    /// Loads the file (defaults if it does not exist), applies the
    /// environment overrides and validates the result
    pub async fn load(path: &Path) -> Result<Self> {
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                info!("Loading gateway config from {}", path.display());
                Self::from_toml_str(&content)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                return Err(GatewayError::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GatewayError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Applies the `GATEWAY_*` overrides found through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("GATEWAY_BROKER_HOST") {
            debug!("Broker host overridden from environment");
            self.broker.host = host;
        }
        if let Some(port) = lookup("GATEWAY_BROKER_PORT") {
            self.broker.port = parse_override("GATEWAY_BROKER_PORT", &port)?;
        }
        if let Some(port) = lookup("GATEWAY_SERIAL_PORT") {
            debug!("Serial port overridden from environment");
            self.serial.port = port;
        }
        if let Some(baudrate) = lookup("GATEWAY_SERIAL_BAUDRATE") {
            self.serial.baudrate = parse_override("GATEWAY_SERIAL_BAUDRATE", &baudrate)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker.client_id.is_empty() {
            return Err(GatewayError::Config("broker.client_id must not be empty".into()));
        }
        if self.router.queue_capacity == 0 {
            return Err(GatewayError::Config("router.queue_capacity must be positive".into()));
        }
        if self.timing.tick_interval_ms == 0 {
            return Err(GatewayError::Config("timing.tick_interval_ms must be positive".into()));
        }
        self.broker_log_level()?;
        self.serial
            .device()
            .validate()
            .map_err(|e| GatewayError::Config(format!("serial: {}", e)))
    }

    pub fn broker_log_level(&self) -> Result<Level> {
        parse_override("logging.broker_level", &self.logging.broker_level)
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            queue_capacity: self.router.queue_capacity,
            propagation_interval: Duration::from_secs(self.timing.config_propagation_secs),
        }
    }

    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            device: self.serial.device(),
            discovery_marker: self.serial.discovery_marker.clone(),
        }
    }

    pub fn config_store(&self) -> ConfigStore {
        ConfigStore::new(
            self.serial
                .store_path
                .clone()
                .unwrap_or_else(ConfigStore::default_path),
        )
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            timing: TimingSettings {
                reconnect_backoff: Duration::from_secs(self.timing.reconnect_backoff_secs),
                tick_interval: Duration::from_millis(self.timing.tick_interval_ms),
            },
            sentinels: Sentinels {
                payload_request: self.serial.payload_request.clone(),
                payload_received: self.serial.payload_received.clone(),
            },
        }
    }
}

fn parse_override<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| GatewayError::Config(format!("{}={:?}: {}", key, value, e)))
}
