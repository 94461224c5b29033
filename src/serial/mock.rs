//! In-memory serial driver for tests and dry runs
//!
//! A [`MockDriver`] simulates a single device that may be reachable on any
//! number of ports. Clones share state, so a test keeps one clone to feed lines
//! and inspect writes while the link owns another.

use super::driver::{PortDescriptor, SerialDriver, SerialHandle};
use crate::error::{GatewayError, Result};
use crate::payload::DeviceConfig;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    ports: Vec<PortDescriptor>,
    reachable: HashSet<String>,
    incoming: VecDeque<u8>,
    written: Vec<u8>,
    opened: Vec<DeviceConfig>,
    generation: u64,
    read_delay: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock_state(&self.state)
    }

    /// Lists a port in discovery and makes it openable
    pub fn add_port(&self, name: &str, description: &str) -> &Self {
        let mut state = self.lock();
        state.ports.push(PortDescriptor::new(name, description));
        state.reachable.insert(name.to_string());
        self
    }

    pub fn set_reachable(&self, name: &str, reachable: bool) -> &Self {
        let mut state = self.lock();
        if reachable {
            state.reachable.insert(name.to_string());
        } else {
            state.reachable.remove(name);
        }
        self
    }

    /// Makes every read block this long, like an idle line with a read timeout
    pub fn set_read_delay(&self, delay: Duration) {
        self.lock().read_delay = delay;
    }

    /// Queues a line the device will send, terminator appended
    pub fn push_line(&self, line: &str) {
        let mut state = self.lock();
        state.incoming.extend(line.as_bytes());
        state.incoming.push_back(b'\n');
    }

    pub fn push_bytes(&self, bytes: &[u8]) {
        self.lock().incoming.extend(bytes);
    }

    /// Everything written to the device so far, split into lines
    pub fn written_lines(&self) -> Vec<String> {
        let state = self.lock();
        String::from_utf8_lossy(&state.written)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Configs of every successful open, oldest first
    pub fn opened_configs(&self) -> Vec<DeviceConfig> {
        self.lock().opened.clone()
    }

    /// Drops every open handle, as if the cable was pulled
    pub fn disconnect(&self) {
        self.lock().generation += 1;
    }
}

fn lock_state(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SerialDriver for MockDriver {
    fn open(&self, config: &DeviceConfig) -> Result<Box<dyn SerialHandle>> {
        let mut state = self.lock();
        if !state.reachable.contains(&config.port) {
            return Err(GatewayError::Open(format!("{}: no such device", config.port)));
        }
        state.opened.push(config.clone());

        Ok(Box::new(MockHandle {
            state: self.state.clone(),
            generation: state.generation,
            open: true,
        }))
    }

    fn available_ports(&self) -> Result<Vec<PortDescriptor>> {
        Ok(self.lock().ports.clone())
    }
}

struct MockHandle {
    state: Arc<Mutex<MockState>>,
    generation: u64,
    open: bool,
}

impl MockHandle {
    fn check_open(&mut self) -> io::Result<MutexGuard<'_, MockState>> {
        let state = lock_state(&self.state);
        if !self.open || state.generation != self.generation {
            self.open = false;
            return Err(io::Error::new(io::ErrorKind::NotConnected, "device gone"));
        }
        Ok(state)
    }
}

impl SerialHandle for MockHandle {
    fn is_open(&self) -> bool {
        self.open && lock_state(&self.state).generation == self.generation
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let delay = lock_state(&self.state).read_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.check_open()?;
        let n = buf.len().min(state.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(state.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.check_open()?;
        state.written.extend_from_slice(bytes);
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_port_cannot_be_opened() {
        let driver = MockDriver::new();
        assert!(driver.open(&DeviceConfig::new("/dev/ttyACM0")).is_err());

        driver.add_port("/dev/ttyACM0", "Arduino Uno");
        assert!(driver.open(&DeviceConfig::new("/dev/ttyACM0")).is_ok());
        assert_eq!(driver.opened_configs().len(), 1);

        driver.set_reachable("/dev/ttyACM0", false);
        assert!(driver.open(&DeviceConfig::new("/dev/ttyACM0")).is_err());
        assert_eq!(driver.available_ports().unwrap().len(), 1);
    }

    #[test]
    fn disconnect_invalidates_handles() {
        let driver = MockDriver::new();
        driver.add_port("/dev/ttyACM0", "Arduino Uno");
        let mut handle = driver.open(&DeviceConfig::new("/dev/ttyACM0")).unwrap();
        assert!(handle.is_open());

        driver.disconnect();
        assert!(!handle.is_open());
        let mut buf = [0u8; 8];
        assert!(handle.read_chunk(&mut buf).is_err());
    }

    #[test]
    fn handle_reads_queued_bytes_and_records_writes() {
        let driver = MockDriver::new();
        driver.add_port("/dev/ttyACM0", "Arduino Uno");
        driver.push_line("hello");
        let mut handle = driver.open(&DeviceConfig::new("/dev/ttyACM0")).unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(handle.read_chunk(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");

        handle.write_all(b"one\ntwo\n").unwrap();
        assert_eq!(driver.written_lines(), vec!["one", "two"]);
    }
}
