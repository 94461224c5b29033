//! Durable storage of the last applied device configuration
//!
//! The store is a single JSON file. Writes overwrite the whole file, reads
//! tolerate a missing or corrupt file so startup can fall back to discovery.

use crate::error::{GatewayError, Result};
use crate::payload::DeviceConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const STORE_DIR: &str = "serial-gateway";
const STORE_FILE: &str = "serial_config.json";

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/serial-gateway/serial_config.json`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::data_local_dir().unwrap_or_else(|| {
            warn!("Could not determine data directory, using current directory");
            PathBuf::from(".")
        });
        path.push(STORE_DIR);
        path.push(STORE_FILE);
        path
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last persisted config, `None` when the file is missing or unusable
    pub async fn load(&self) -> Option<DeviceConfig> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No persisted serial config at {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!(
                    "Failed to read persisted serial config {}: {}",
                    self.path.display(),
                    e
                );
                return None;
            }
        };

        match DeviceConfig::from_json(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(
                    "Ignoring corrupt serial config {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    pub async fn save(&self, config: &DeviceConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    GatewayError::Persistence(format!(
                        "Failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let content = serde_json::to_vec_pretty(config)
            .map_err(|e| GatewayError::Persistence(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(&self.path, content).await.map_err(|e| {
            GatewayError::Persistence(format!(
                "Failed to write {}: {}",
                self.path.display(),
                e
            ))
        })?;

        info!("Persisted serial config for {} to {}", config.port, self.path.display());
        Ok(())
    }
}
