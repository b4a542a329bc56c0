//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use std::io;
use tokio_serial::SerialPortBuilderExt;

use crate::error::{Result, SpoolerError};

/// Trait for serial port I/O operations
#[async_trait]
pub trait SerialPortIO: Send {
    /// Read whatever bytes are available, returning 0 on end of stream
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Something that can (re)acquire a serial port
pub trait PortOpener: Send + Sync {
    type Port: SerialPortIO;

    /// Open a fresh handle to the device
    fn open(&self) -> Result<Self::Port>;

    /// Human readable device name for logs
    fn describe(&self) -> String;
}

/// Wrapper around tokio_serial::SerialStream that implements SerialPortIO
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use tokio::io::AsyncReadExt;
        self.port.read(buf).await
    }
}

/// Opens a real serial device at a fixed baud rate (8N1, no flow control)
#[derive(Debug, Clone)]
pub struct TokioSerialOpener {
    path: String,
    baud_rate: u32,
}

impl TokioSerialOpener {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

impl PortOpener for TokioSerialOpener {
    type Port = TokioSerialPort;

    fn open(&self) -> Result<TokioSerialPort> {
        let port = tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| SpoolerError::Serial(format!("Failed to open {}: {}", self.path, e)))?;

        Ok(TokioSerialPort::new(port))
    }

    fn describe(&self) -> String {
        format!("{} @{}", self.path, self.baud_rate)
    }
}
