//! # Sensor Spooler
//!
//! Spool serial sensor readings to daily CSV files and ship them to a
//! remote collector.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load the TOML configuration (first argument, default `config/default.toml`)
//!    - Create the data, image and log directories
//!    - Set up logging to the console and the local log file
//!
//! 2. **Workers**
//!    - Ingestion: serial line -> daily CSV row, reconnecting forever
//!    - Upload scheduler: oldest finished CSV + images -> collector
//!    - Heartbeat scheduler (optional): device status -> collector
//!
//! 3. **Graceful Shutdown**
//!    - Ctrl+C or SIGTERM cancels every worker at its next wait point
//!    - Workers are joined before exit
//!
//! # Examples
//!
//! ```bash
//! cargo run --release -- /etc/sensor-spooler/config.toml
//! ```
//!
//! Expected output:
//! ```text
//! INFO sensor_spooler: Sensor Spooler v0.1.0 starting...
//! INFO sensor_spooler::serial: Serial link established on /dev/ttyACM0 @9600
//! INFO sensor_spooler::scheduler: upload scheduler started: first cycle in 300s, then every 600s
//! ```

use anyhow::{Context, Result};
use tracing::info;

use sensor_spooler::config::Config;
use sensor_spooler::logging;
use sensor_spooler::supervisor::Supervisor;

/// Configuration file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;
    config
        .ensure_directories()
        .context("Failed to create storage directories")?;

    let _log_guard = logging::init(&config.storage.log_file, &config.logging)?;

    info!("Sensor Spooler v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Reading {} @{} baud, uploading to {}",
        config.serial.port, config.serial.baud_rate, config.upload.server_url
    );

    Supervisor::new(config).run().await
}
