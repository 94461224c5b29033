//! The gateway's connection to the serial device

use super::driver::{SerialDriver, SerialHandle};
use super::line_buffer::LineBuffer;
use super::store::ConfigStore;
use super::{ConnectionState, SerialSettings};
use crate::error::{GatewayError, Result};
use crate::payload::DeviceConfig;
use std::io;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

const READ_CHUNK: usize = 1024;

struct LinkInner {
    handle: Option<Box<dyn SerialHandle>>,
    buffer: LineBuffer,
    state: ConnectionState,
}

/// Line oriented serial connection with device discovery and persisted
/// configuration
///
/// Every operation touching the handle takes the same async mutex, so reads,
/// writes and reconfiguration never interleave. Blocking driver calls run on
/// the blocking pool while the lock is held. The active config lives in a
/// watch channel outside that lock and can be read while a read is pending.
pub struct SerialLink {
    driver: Arc<dyn SerialDriver>,
    store: ConfigStore,
    settings: SerialSettings,
    config: watch::Sender<DeviceConfig>,
    inner: Mutex<LinkInner>,
}

impl SerialLink {
    pub fn new(driver: Arc<dyn SerialDriver>, store: ConfigStore, settings: SerialSettings) -> Self {
        info!(
            "Creating serial link for {} (discovery marker {:?}, store {})",
            settings.device.port,
            settings.discovery_marker,
            store.path().display()
        );

        let (config, _) = watch::channel(settings.device.clone());

        Self {
            driver,
            store,
            config,
            inner: Mutex::new(LinkInner {
                handle: None,
                buffer: LineBuffer::new(),
                state: ConnectionState::Closed,
            }),
            settings,
        }
    }

    /// Discovers the device and opens it
    pub async fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.state = ConnectionState::Discovering;
        let base = self.current_config();
        let config = self.discover_from(&base).await;
        self.connect(&mut inner, config).await
    }

    /// Finds the config to connect with
    ///
    /// Tries the persisted config first (probed by a short open), then scans
    /// for a port whose description contains the discovery marker, and finally
    /// falls back to the construction config.
    pub async fn discover(&self) -> DeviceConfig {
        let base = self.current_config();
        self.discover_from(&base).await
    }

    async fn discover_from(&self, base: &DeviceConfig) -> DeviceConfig {
        if let Some(persisted) = self.store.load().await {
            match self.probe(&persisted).await {
                Ok(()) => {
                    info!("Using persisted serial config for {}", persisted.port);
                    return persisted;
                }
                Err(e) => warn!("Persisted serial config is not usable: {}", e),
            }
        }

        match self.scan().await {
            Ok(Some(port)) => {
                info!(
                    "Found device matching {:?} on {}",
                    self.settings.discovery_marker, port
                );
                return base.with_port(port);
            }
            Ok(None) => debug!(
                "No port matches discovery marker {:?}",
                self.settings.discovery_marker
            ),
            Err(e) => warn!("Port scan failed: {}", e),
        }

        info!(
            "Falling back to configured serial port {}",
            self.settings.device.port
        );
        self.settings.device.clone()
    }

    async fn probe(&self, config: &DeviceConfig) -> Result<()> {
        let driver = self.driver.clone();
        let config = config.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut handle = driver.open(&config)?;
            handle.close();
            Ok(())
        })
        .await
        .map_err(|e| GatewayError::Open(format!("Probe task failed: {}", e)))?
    }

    async fn scan(&self) -> Result<Option<String>> {
        let driver = self.driver.clone();
        let ports = tokio::task::spawn_blocking(move || driver.available_ports())
            .await
            .map_err(|e| GatewayError::Open(format!("Scan task failed: {}", e)))??;

        debug!("Scanned {} serial ports", ports.len());
        Ok(ports
            .into_iter()
            .find(|p| p.description.contains(&self.settings.discovery_marker))
            .map(|p| p.name))
    }

    async fn connect(&self, inner: &mut LinkInner, config: DeviceConfig) -> Result<()> {
        if let Some(mut handle) = inner.handle.take() {
            debug!("Closing {} before reconnect", self.config.borrow().port);
            handle.close();
        }
        inner.buffer.clear();
        let port = config.port.clone();
        self.config.send_replace(config.clone());

        let driver = self.driver.clone();
        let opened = tokio::task::spawn_blocking(move || driver.open(&config))
            .await
            .map_err(|e| GatewayError::Open(format!("Open task failed: {}", e)))
            .and_then(|r| r);

        match opened {
            Ok(handle) => {
                inner.handle = Some(handle);
                inner.state = ConnectionState::Open;
                info!("Serial link open on {}", port);
                Ok(())
            }
            Err(e) => {
                inner.state = ConnectionState::Closed;
                error!("Failed to open {}: {}", port, e);
                Err(e)
            }
        }
    }

    /// Runs a blocking operation on the handle, keeping it only while it
    /// stays open
    async fn on_handle<T, F>(inner: &mut LinkInner, op: F) -> io::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SerialHandle) -> io::Result<T> + Send + 'static,
    {
        let mut handle = match inner.handle.take() {
            Some(handle) if handle.is_open() => handle,
            _ => {
                inner.state = ConnectionState::Closed;
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "port is not open",
                ));
            }
        };

        let joined = tokio::task::spawn_blocking(move || {
            let result = op(handle.as_mut());
            (handle, result)
        })
        .await;

        match joined {
            Ok((handle, result)) => {
                if handle.is_open() {
                    inner.handle = Some(handle);
                } else {
                    inner.state = ConnectionState::Closed;
                }
                result
            }
            Err(e) => {
                inner.state = ConnectionState::Closed;
                Err(io::Error::other(e.to_string()))
            }
        }
    }

    /// Next complete line from the device
    ///
    /// `Ok(None)` while no full line has arrived yet. Lines already buffered
    /// are returned one per call before the device is read again.
    pub async fn read(&self) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        if let Some(line) = inner.buffer.next_line() {
            return Ok(Some(line));
        }

        let port = self.config.borrow().port.clone();
        let bytes = Self::on_handle(&mut inner, |handle| {
            let mut buf = vec![0u8; READ_CHUNK];
            let n = handle.read_chunk(&mut buf)?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
        .map_err(|e| GatewayError::Read(format!("{}: {}", port, e)))?;

        inner.buffer.push(&bytes);
        Ok(inner.buffer.next_line())
    }

    /// Sends one line, the terminator is appended here
    pub async fn write(&self, line: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let port = self.config.borrow().port.clone();
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        Self::on_handle(&mut inner, move |handle| handle.write_all(&bytes))
            .await
            .map_err(|e| GatewayError::Write(format!("{}: {}", port, e)))?;

        debug!("Wrote {} bytes to {}", line.len() + 1, port);
        Ok(())
    }

    /// Restarts the connection with the config and persists it once the
    /// device is open
    ///
    /// Applying the active config to a healthy link does not reconnect. A
    /// config that cannot be opened is never persisted, so the store keeps
    /// the last one that worked. A failed save is logged only.
    pub async fn update_config(&self, config: DeviceConfig) -> Result<()> {
        config.validate()?;

        let mut inner = self.inner.lock().await;
        let healthy = inner.handle.as_ref().is_some_and(|h| h.is_open());
        if healthy && *self.config.borrow() == config {
            debug!("Serial config for {} unchanged, keeping connection", config.port);
            return Ok(());
        }

        info!("Applying serial config {:?}", config);
        self.connect(&mut inner, config.clone()).await?;

        if let Err(e) = self.store.save(&config).await {
            warn!("Serial config not persisted: {}", e);
        }
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let healthy = inner.handle.as_ref().is_some_and(|h| h.is_open());
        if !healthy && inner.state == ConnectionState::Open {
            inner.state = ConnectionState::Closed;
        }
        healthy
    }

    /// The config in use, or being tried while disconnected
    pub fn current_config(&self) -> DeviceConfig {
        self.config.borrow().clone()
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(mut handle) = inner.handle.take() {
            handle.close();
        }
        inner.buffer.clear();
        inner.state = ConnectionState::Closed;
        info!("Serial link on {} closed", self.config.borrow().port);
    }
}
