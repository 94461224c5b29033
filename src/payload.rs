//! Payload model shared by every component of the gateway
//!
//! A [`Payload`] is a closed sum type: each instance carries exactly one
//! variant and routing decisions only ever look at its [`PayloadTag`].
//! Instances are built at the point of ingestion (a parsed device line or a
//! decoded broker message) and are consumed once by the router.

use crate::error::{GatewayError, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Read timeout used when the device config asks for a non-blocking poll
pub const POLL_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Tag of a [`Payload`] variant, the only input of the route table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadTag {
    Telemetry,
    ConfigUpdate,
    ConfigEcho,
    StatusUpdate,
    LogEntry,
    CommandData,
}

impl PayloadTag {
    pub const ALL: [PayloadTag; 6] = [
        PayloadTag::Telemetry,
        PayloadTag::ConfigUpdate,
        PayloadTag::ConfigEcho,
        PayloadTag::StatusUpdate,
        PayloadTag::LogEntry,
        PayloadTag::CommandData,
    ];
}

impl fmt::Display for PayloadTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadTag::Telemetry => write!(f, "telemetry"),
            PayloadTag::ConfigUpdate => write!(f, "config_update"),
            PayloadTag::ConfigEcho => write!(f, "config_echo"),
            PayloadTag::StatusUpdate => write!(f, "status_update"),
            PayloadTag::LogEntry => write!(f, "log_entry"),
            PayloadTag::CommandData => write!(f, "command_data"),
        }
    }
}

/// Parity setting of the serial line, serialized with the single letter codes
/// the device tooling uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    #[serde(rename = "N")]
    None,
    #[serde(rename = "E")]
    Even,
    #[serde(rename = "O")]
    Odd,
    #[serde(rename = "M")]
    Mark,
    #[serde(rename = "S")]
    Space,
}

fn default_baudrate() -> u32 {
    115_200
}

fn default_bytesize() -> u8 {
    8
}

fn default_stopbits() -> u8 {
    1
}

fn default_timeout() -> Option<u64> {
    Some(0)
}

/// Connection parameters of the serial device
///
/// Immutable once active: replacing it requires a connection restart through
/// `SerialLink::update_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub port: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default = "default_bytesize")]
    pub bytesize: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stopbits")]
    pub stopbits: u8,
    /// Read timeout in seconds, `0` or absent means poll
    #[serde(default = "default_timeout")]
    pub timeout: Option<u64>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baudrate: default_baudrate(),
            bytesize: default_bytesize(),
            parity: Parity::default(),
            stopbits: default_stopbits(),
            timeout: default_timeout(),
        }
    }
}

impl DeviceConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    /// Decodes and validates a config from its JSON wire form
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: DeviceConfig = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the value ranges the serial driver accepts
    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(GatewayError::Decode("port must not be empty".to_string()));
        }
        if self.baudrate == 0 {
            return Err(GatewayError::Decode(
                "baudrate must be greater than zero".to_string(),
            ));
        }
        if !(5..=8).contains(&self.bytesize) {
            return Err(GatewayError::Decode(format!(
                "bytesize must be 5-8, got {}",
                self.bytesize
            )));
        }
        if !matches!(self.stopbits, 1 | 2) {
            return Err(GatewayError::Decode(format!(
                "stopbits must be 1 or 2, got {}",
                self.stopbits
            )));
        }
        Ok(())
    }

    /// Same parameters on a different port
    pub fn with_port(&self, port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..self.clone()
        }
    }

    /// Upper bound of a single blocking read or probe
    pub fn read_timeout(&self) -> Duration {
        match self.timeout {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => POLL_READ_TIMEOUT,
        }
    }
}

/// Sensor readings reported by the device, one JSON object per line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub created_at: DateTime<Local>,
    pub controller_watts: i64,
    pub time_to_go: i64,
    pub controller_volts: f64,
    #[serde(rename = "MPPT_volts")]
    pub mppt_volts: f64,
    #[serde(rename = "MPPT_watts")]
    pub mppt_watts: f64,
    pub motor_temp: f64,
    pub motor_revols: f64,
    pub position_lat: f64,
    pub position_lng: f64,
}

impl Telemetry {
    /// Parses a device line, stamping it with the local receipt time
    ///
    /// Any `created_at` sent by the device is overwritten.
    pub fn from_line(line: &str) -> Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(line)?;
        let object = value.as_object_mut().ok_or_else(|| {
            GatewayError::Decode(format!("expected a JSON object, got {}", line.trim()))
        })?;
        object.insert(
            "created_at".to_string(),
            serde_json::to_value(Local::now())?,
        );
        Ok(serde_json::from_value(value)?)
    }
}

/// Request from the broker to switch the device connection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub timestamp: DateTime<Local>,
    pub config: DeviceConfig,
}

/// The authoritative device configuration, echoed to the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEcho {
    pub timestamp: DateTime<Local>,
    pub config: DeviceConfig,
}

/// Application health as seen by external observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    #[default]
    Starting,
    Running,
    Failing,
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppStatus::Starting => write!(f, "starting"),
            AppStatus::Running => write!(f, "running"),
            AppStatus::Failing => write!(f, "failing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub timestamp: DateTime<Local>,
    pub status: AppStatus,
}

/// Free text forwarded to the log channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub data: String,
}

/// Priority tier of a [`CommandData`] item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    High,
}

/// Command for the device received from the broker's command queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandData {
    #[serde(default = "Local::now")]
    pub timestamp: DateTime<Local>,
    pub id: u64,
    pub priority: Priority,
    pub payload: serde_json::Value,
}

/// Unit of data moved through the gateway
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Telemetry(Telemetry),
    ConfigUpdate(ConfigUpdate),
    ConfigEcho(ConfigEcho),
    StatusUpdate(StatusUpdate),
    LogEntry(LogEntry),
    CommandData(CommandData),
}

impl Payload {
    pub fn tag(&self) -> PayloadTag {
        match self {
            Payload::Telemetry(_) => PayloadTag::Telemetry,
            Payload::ConfigUpdate(_) => PayloadTag::ConfigUpdate,
            Payload::ConfigEcho(_) => PayloadTag::ConfigEcho,
            Payload::StatusUpdate(_) => PayloadTag::StatusUpdate,
            Payload::LogEntry(_) => PayloadTag::LogEntry,
            Payload::CommandData(_) => PayloadTag::CommandData,
        }
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        match self {
            Payload::Telemetry(t) => t.created_at,
            Payload::ConfigUpdate(c) => c.timestamp,
            Payload::ConfigEcho(c) => c.timestamp,
            Payload::StatusUpdate(s) => s.timestamp,
            Payload::LogEntry(l) => l.timestamp,
            Payload::CommandData(c) => c.timestamp,
        }
    }

    pub fn log(data: impl Into<String>) -> Self {
        Payload::LogEntry(LogEntry {
            timestamp: Local::now(),
            data: data.into(),
        })
    }

    pub fn status(status: AppStatus) -> Self {
        Payload::StatusUpdate(StatusUpdate {
            timestamp: Local::now(),
            status,
        })
    }

    pub fn config_update(config: DeviceConfig) -> Self {
        Payload::ConfigUpdate(ConfigUpdate {
            timestamp: Local::now(),
            config,
        })
    }

    pub fn config_echo(config: DeviceConfig) -> Self {
        Payload::ConfigEcho(ConfigEcho {
            timestamp: Local::now(),
            config,
        })
    }

    /// Converts a device line into telemetry, or into a log entry describing
    /// why it could not be decoded
    pub fn from_device_line(line: &str) -> Self {
        match Telemetry::from_line(line) {
            Ok(telemetry) => Payload::Telemetry(telemetry),
            Err(e) => Payload::log(format!("Failed to decode device line {:?}: {}", line, e)),
        }
    }
}
