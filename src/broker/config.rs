use serde::{Deserialize, Serialize};

/// Names of the broker channels the gateway talks on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Channels {
    /// Inbound device config requests
    pub config: String,
    /// Outbound authoritative config echo
    pub config_apply: String,
    pub status_update: String,
    pub telemetry: String,
    pub log: String,
    /// Inbound command data for the device
    pub land_queue: String,
}

impl Default for Channels {
    fn default() -> Self {
        Self {
            config: "config".to_string(),
            config_apply: "config_apply".to_string(),
            status_update: "status_update".to_string(),
            telemetry: "telemetry".to_string(),
            log: "log".to_string(),
            land_queue: "land_queue".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Capacity of the client's outgoing request queue
    pub request_capacity: usize,
    pub channels: Channels,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "serial-gateway".to_string(),
            keep_alive_secs: 5,
            username: None,
            password: None,
            request_capacity: 100,
            channels: Channels::default(),
        }
    }
}
