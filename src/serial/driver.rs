//! Access to serial hardware behind two small traits
//!
//! [`SerialDriver`] opens handles and enumerates ports, [`SerialHandle`] is a
//! single open connection. Both are blocking; the link calls them from
//! `spawn_blocking`. [`SystemDriver`] is the implementation backed by the
//! `serialport` crate.

use crate::error::{GatewayError, Result};
use crate::payload::{DeviceConfig, Parity};
use serialport::{DataBits, FlowControl, SerialPortType, StopBits};
use std::io::{self, Read, Write};
use tracing::{debug, info, warn};

/// A port as reported by the operating system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub name: String,
    /// Human readable description (USB product and manufacturer when known)
    pub description: String,
}

impl PortDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// An open serial connection
pub trait SerialHandle: Send {
    fn is_open(&self) -> bool;

    /// Reads whatever is available, `Ok(0)` when the read timed out
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn close(&mut self);
}

pub trait SerialDriver: Send + Sync {
    fn open(&self, config: &DeviceConfig) -> Result<Box<dyn SerialHandle>>;

    fn available_ports(&self) -> Result<Vec<PortDescriptor>>;
}

/// Driver for real hardware
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDriver;

impl SystemDriver {
    pub fn new() -> Self {
        Self
    }
}

fn data_bits(bytesize: u8) -> Result<DataBits> {
    match bytesize {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(GatewayError::Open(format!("unsupported bytesize {}", other))),
    }
}

fn stop_bits(stopbits: u8) -> Result<StopBits> {
    match stopbits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(GatewayError::Open(format!("unsupported stopbits {}", other))),
    }
}

fn parity(parity: Parity) -> Result<serialport::Parity> {
    match parity {
        Parity::None => Ok(serialport::Parity::None),
        Parity::Even => Ok(serialport::Parity::Even),
        Parity::Odd => Ok(serialport::Parity::Odd),
        other => Err(GatewayError::Open(format!(
            "parity {:?} is not supported by the system driver",
            other
        ))),
    }
}

impl SerialDriver for SystemDriver {
    fn open(&self, config: &DeviceConfig) -> Result<Box<dyn SerialHandle>> {
        debug!("Opening {} with {:?}", config.port, config);

        let port = serialport::new(config.port.as_str(), config.baudrate)
            .data_bits(data_bits(config.bytesize)?)
            .parity(parity(config.parity)?)
            .stop_bits(stop_bits(config.stopbits)?)
            .flow_control(FlowControl::Hardware)
            .timeout(config.read_timeout())
            .open()
            .map_err(|e| GatewayError::Open(format!("{}: {}", config.port, e)))?;

        info!("Opened serial port {} at {} baud", config.port, config.baudrate);
        Ok(Box::new(SystemHandle {
            name: config.port.clone(),
            port: Some(port),
        }))
    }

    fn available_ports(&self) -> Result<Vec<PortDescriptor>> {
        let ports = serialport::available_ports()
            .map_err(|e| GatewayError::Open(format!("Failed to enumerate ports: {}", e)))?;

        Ok(ports
            .into_iter()
            .map(|info| {
                let description = match info.port_type {
                    SerialPortType::UsbPort(usb) => [usb.manufacturer, usb.product]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>()
                        .join(" "),
                    SerialPortType::PciPort => "PCI".to_string(),
                    SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                    SerialPortType::Unknown => String::new(),
                };
                PortDescriptor::new(info.port_name, description)
            })
            .collect())
    }
}

struct SystemHandle {
    name: String,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SystemHandle {
    fn port_mut(&mut self) -> io::Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
    }
}

impl SerialHandle for SystemHandle {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.port_mut()?.read(buf);
        match result {
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => {
                warn!("Read on {} failed, closing: {}", self.name, e);
                self.close();
                Err(e)
            }
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.port_mut()?;
        let result = port.write_all(bytes).and_then(|_| port.flush());
        if let Err(e) = &result {
            warn!("Write on {} failed, closing: {}", self.name, e);
            self.close();
        }
        result
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed serial port {}", self.name);
        }
    }
}
