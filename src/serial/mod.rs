//! # Serial Communication Module
//!
//! Handles the connection to the sensor board.
//!
//! This module handles:
//! - Opening the serial device at a fixed baud rate
//! - Splitting the byte stream into text lines
//! - Read timeouts reported as "no data" instead of errors
//! - Error recovery and reconnection, forever, until shutdown

pub mod framing;
pub mod port_trait;

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use framing::LineFramer;
use port_trait::{PortOpener, SerialPortIO, TokioSerialOpener};

/// Size of a single read from the device
const READ_CHUNK_SIZE: usize = 256;

/// What a call to [`SerialLineSource::next_line`] produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// A complete, decoded line (may be empty)
    Line(String),
    /// The read timeout elapsed without a complete line
    Idle,
    /// The shutdown signal fired; the port has been released
    Shutdown,
}

/// Self-healing line reader over a serial device
///
/// Callers never see device failures: a hard I/O error closes the handle,
/// waits the reconnect delay and reopens the device.
pub struct SerialLineSource<O: PortOpener> {
    opener: O,
    port: Option<O::Port>,
    framer: LineFramer,
    read_timeout: Duration,
    reconnect_delay: Duration,
    cancel: CancellationToken,
}

impl<O: PortOpener> std::fmt::Debug for SerialLineSource<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLineSource")
            .field("device", &self.opener.describe())
            .field("connected", &self.port.is_some())
            .finish_non_exhaustive()
    }
}

impl SerialLineSource<TokioSerialOpener> {
    /// Build a source for the device named in the configuration
    ///
    /// The device is not opened until the first call to [`Self::open`] or
    /// [`Self::next_line`].
    pub fn from_config(config: &SerialConfig, cancel: CancellationToken) -> Self {
        Self::new(
            TokioSerialOpener::new(&config.port, config.baud_rate),
            config,
            cancel,
        )
    }
}

impl<O: PortOpener> SerialLineSource<O> {
    pub fn new(opener: O, config: &SerialConfig, cancel: CancellationToken) -> Self {
        Self {
            opener,
            port: None,
            framer: LineFramer::new(config.max_line_bytes),
            read_timeout: config.read_timeout(),
            reconnect_delay: config.reconnect_delay(),
            cancel,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Acquire the device, retrying after the reconnect delay until it opens
    ///
    /// Returns `false` if shutdown was signaled before the device opened.
    pub async fn open(&mut self) -> bool {
        while !self.cancel.is_cancelled() {
            match self.opener.open() {
                Ok(port) => {
                    info!("Serial link established on {}", self.opener.describe());
                    self.port = Some(port);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Cannot open {}: {} - retrying in {}s",
                        self.opener.describe(),
                        e,
                        self.reconnect_delay.as_secs()
                    );
                    if !self.wait_reconnect_delay().await {
                        break;
                    }
                }
            }
        }
        false
    }

    /// Wait for the next line from the device
    ///
    /// Blocks until a full line arrives, the read timeout elapses
    /// ([`LineEvent::Idle`]) or shutdown is signaled ([`LineEvent::Shutdown`]).
    pub async fn next_line(&mut self) -> LineEvent {
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            if let Some(line) = self.framer.next_line() {
                return LineEvent::Line(line);
            }

            if self.cancel.is_cancelled() {
                self.close();
                return LineEvent::Shutdown;
            }

            if self.port.is_none() && !self.open().await {
                self.close();
                return LineEvent::Shutdown;
            }

            let Some(port) = self.port.as_mut() else {
                continue;
            };

            let read = tokio::select! {
                res = tokio::time::timeout(self.read_timeout, port.read(&mut chunk)) => Some(res),
                _ = self.cancel.cancelled() => None,
            };

            let Some(read) = read else {
                self.close();
                return LineEvent::Shutdown;
            };

            match read {
                Err(_elapsed) => return LineEvent::Idle,
                Ok(Ok(0)) => {
                    self.handle_disconnect("device reported end of stream").await;
                }
                Ok(Ok(n)) => {
                    self.framer.push(&chunk[..n]);
                }
                Ok(Err(e)) => {
                    self.handle_disconnect(&e.to_string()).await;
                }
            }
        }
    }

    /// Release the device handle and any partial line
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed serial device {}", self.opener.describe());
        }
        self.framer.clear();
    }

    async fn handle_disconnect(&mut self, reason: &str) {
        warn!(
            "Serial device {} lost ({}) - reconnecting in {}s",
            self.opener.describe(),
            reason,
            self.reconnect_delay.as_secs()
        );
        self.close();
        self.wait_reconnect_delay().await;
    }

    /// Returns `false` when interrupted by shutdown
    async fn wait_reconnect_delay(&self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.reconnect_delay) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::port_trait::mocks::{MockOpener, OpenStep, ReadStep};
    use super::*;
    use std::io;

    fn test_config() -> SerialConfig {
        SerialConfig {
            port: "/dev/null".to_string(),
            baud_rate: 9600,
            read_timeout_ms: 1000,
            reconnect_delay_secs: 600,
            max_line_bytes: 256,
        }
    }

    fn data(s: &str) -> ReadStep {
        ReadStep::Data(s.as_bytes().to_vec())
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_lines_in_order() {
        let opener = MockOpener::new(vec![OpenStep::Port(vec![
            data("20.1;55;300;1.2\n21.0;"),
            data("54;310;1.3\n"),
        ])]);
        let mut source = SerialLineSource::new(opener, &test_config(), CancellationToken::new());

        assert_eq!(source.next_line().await, LineEvent::Line("20.1;55;300;1.2".into()));
        assert_eq!(source.next_line().await, LineEvent::Line("21.0;54;310;1.3".into()));
        assert!(source.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_idle() {
        let opener = MockOpener::new(vec![OpenStep::Port(vec![])]);
        let mut source = SerialLineSource::new(opener, &test_config(), CancellationToken::new());

        assert_eq!(source.next_line().await, LineEvent::Idle);
        assert!(source.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_retries_until_device_appears() {
        let opener = MockOpener::new(vec![
            OpenStep::Fail,
            OpenStep::Fail,
            OpenStep::Port(vec![data("ok\n")]),
        ]);
        let mut source =
            SerialLineSource::new(opener.clone(), &test_config(), CancellationToken::new());

        let start = tokio::time::Instant::now();
        assert!(source.open().await);
        assert_eq!(opener.open_calls(), 3);
        assert!(start.elapsed() >= Duration::from_secs(1200));
        assert_eq!(source.next_line().await, LineEvent::Line("ok".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_read_error() {
        let opener = MockOpener::new(vec![
            OpenStep::Port(vec![data("first\nhalf-li"), ReadStep::Fail(io::ErrorKind::BrokenPipe)]),
            OpenStep::Fail,
            OpenStep::Port(vec![ReadStep::Eof]),
            OpenStep::Port(vec![data("second\n")]),
        ]);
        let mut source =
            SerialLineSource::new(opener.clone(), &test_config(), CancellationToken::new());

        assert_eq!(source.next_line().await, LineEvent::Line("first".into()));
        // The partial line from the dead handle must not leak into the next one
        assert_eq!(source.next_line().await, LineEvent::Line("second".into()));
        assert_eq!(opener.open_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_reconnect_wait() {
        let token = CancellationToken::new();
        let opener = MockOpener::new(vec![OpenStep::Fail]);
        let mut source = SerialLineSource::new(opener, &test_config(), token.clone());

        let canceller = tokio::spawn({
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                token.cancel();
            }
        });

        let start = tokio::time::Instant::now();
        assert_eq!(source.next_line().await, LineEvent::Shutdown);
        assert!(start.elapsed() < Duration::from_secs(600));
        assert!(!source.is_connected());
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_open() {
        let token = CancellationToken::new();
        token.cancel();
        let opener = MockOpener::new(vec![OpenStep::Port(vec![data("never\n")])]);
        let mut source = SerialLineSource::new(opener.clone(), &test_config(), token);

        assert_eq!(source.next_line().await, LineEvent::Shutdown);
        assert_eq!(opener.open_calls(), 0);
    }

    #[test]
    fn test_open_real_device_with_invalid_path_fails() {
        let opener = TokioSerialOpener::new("/dev/nonexistent_serial_device_12345", 9600);
        match opener.open() {
            Err(crate::error::SpoolerError::Serial(msg)) => {
                assert!(msg.contains("/dev/nonexistent_serial_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            Err(other) => panic!("Expected Serial error, got: {:?}", other),
            Ok(_) => panic!("Opening a missing device should fail"),
        }
    }

    // Integration test - only runs if the sensor board is connected
    #[tokio::test]
    #[ignore] // Run with: cargo test -- --ignored
    async fn test_read_line_with_real_hardware() {
        let mut config = test_config();
        config.port = "/dev/ttyACM0".to_string();
        config.read_timeout_ms = 5000;
        let mut source = SerialLineSource::from_config(&config, CancellationToken::new());

        match source.next_line().await {
            LineEvent::Line(line) => println!("Read line from board: {}", line),
            other => println!("No line from board: {:?}", other),
        }
    }
}
