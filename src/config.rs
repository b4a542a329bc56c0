//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! The loaded [`Config`] is built once at startup and handed to each
//! component's constructor; nothing reads configuration from global state.

use chrono::FixedOffset;
use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SpoolerError};

/// Baud rates accepted for the sensor board
const VALID_BAUD_RATES: &[u32] = &[1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

/// Local storage layout
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,

    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Site timezone as a fixed `±HH:MM` offset
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,

    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,
}

/// Remote collector configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default)]
    pub server_url: String,

    #[serde(default)]
    pub auth_token: String,

    #[serde(default = "default_initial_wait_secs")]
    pub initial_wait_secs: u64,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_log_excerpt_bytes")]
    pub log_excerpt_bytes: u64,
}

/// Device heartbeat configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub url: String,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_min_free_mb")]
    pub min_free_mb: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_stdout")]
    pub stdout: bool,

    /// Identical log-file records within this window are written once
    /// (0 disables)
    #[serde(default = "default_log_dedup_window_secs")]
    pub dedup_window_secs: u64,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 9600 }
fn default_read_timeout_ms() -> u64 { 1000 }
fn default_reconnect_delay_secs() -> u64 { 600 }
fn default_max_line_bytes() -> usize { 4096 }

fn default_data_dir() -> PathBuf { PathBuf::from("./data") }
fn default_image_dir() -> PathBuf { PathBuf::from("./data/images") }
fn default_log_file() -> PathBuf { PathBuf::from("./logs/app.log") }
fn default_utc_offset() -> String { "+00:00".to_string() }
fn default_create_dirs() -> bool { true }

fn default_initial_wait_secs() -> u64 { 300 }
fn default_interval_secs() -> u64 { 600 }
fn default_retry_delay_secs() -> u64 { 15 }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_log_excerpt_bytes() -> u64 { 64 * 1024 }

fn default_heartbeat_interval_secs() -> u64 { 1800 }
fn default_min_free_mb() -> u64 { 500 }

fn default_log_level() -> String { "info".to_string() }
fn default_log_stdout() -> bool { true }
fn default_log_dedup_window_secs() -> u64 { 30 }

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            interval_secs: default_heartbeat_interval_secs(),
            min_free_mb: default_min_free_mb(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stdout: default_log_stdout(),
            dedup_window_secs: default_log_dedup_window_secs(),
        }
    }
}

/// Parse a `±HH:MM` (or `±HHMM`, or `Z`) offset
///
/// # Examples
///
/// ```
/// use sensor_spooler::config::parse_utc_offset;
///
/// assert_eq!(parse_utc_offset("+02:00").unwrap().local_minus_utc(), 7200);
/// assert_eq!(parse_utc_offset("-0530").unwrap().local_minus_utc(), -19800);
/// assert!(parse_utc_offset("CET").is_none());
/// ```
pub fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn invalid(msg: impl std::fmt::Display) -> SpoolerError {
    SpoolerError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sensor_spooler::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !VALID_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {:?}",
                VALID_BAUD_RATES
            )));
        }

        if self.serial.read_timeout_ms == 0 || self.serial.read_timeout_ms > 60_000 {
            return Err(invalid("read_timeout_ms must be between 1 and 60000"));
        }

        if self.serial.reconnect_delay_secs == 0 || self.serial.reconnect_delay_secs > 86_400 {
            return Err(invalid("reconnect_delay_secs must be between 1 and 86400"));
        }

        if self.serial.max_line_bytes < 16 {
            return Err(invalid("max_line_bytes must be at least 16"));
        }

        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(invalid("storage data_dir cannot be empty"));
        }

        if self.storage.image_dir.as_os_str().is_empty() {
            return Err(invalid("storage image_dir cannot be empty"));
        }

        if self.storage.log_file.as_os_str().is_empty() {
            return Err(invalid("storage log_file cannot be empty"));
        }

        if parse_utc_offset(&self.storage.utc_offset).is_none() {
            return Err(invalid(format!(
                "utc_offset '{}' must look like +HH:MM",
                self.storage.utc_offset
            )));
        }

        if self.upload.server_url.is_empty() {
            return Err(invalid("upload server_url cannot be empty"));
        }

        if self.upload.auth_token.is_empty() {
            return Err(invalid("upload auth_token cannot be empty"));
        }

        if self.upload.interval_secs == 0 {
            return Err(invalid("upload interval_secs must be greater than 0"));
        }

        if self.upload.interval_secs >= 86_400 {
            return Err(invalid("upload interval_secs must be shorter than a day"));
        }

        if self.upload.request_timeout_secs == 0 || self.upload.request_timeout_secs > 600 {
            return Err(invalid("request_timeout_secs must be between 1 and 600"));
        }

        if self.heartbeat.enabled && self.heartbeat.url.is_empty() {
            return Err(invalid("heartbeat url cannot be empty when enabled"));
        }

        if self.heartbeat.enabled && self.heartbeat.interval_secs == 0 {
            return Err(invalid("heartbeat interval_secs must be greater than 0"));
        }

        Ok(())
    }

    /// Site timezone used for CSV timestamps and day boundaries
    pub fn site_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.storage.utc_offset)
            .ok_or_else(|| invalid(format!("invalid utc_offset '{}'", self.storage.utc_offset)))
    }

    /// Create the data, image and log directories if they are missing
    pub fn ensure_directories(&self) -> Result<()> {
        if !self.storage.create_dirs {
            return Ok(());
        }

        fs::create_dir_all(&self.storage.data_dir)?;
        fs::create_dir_all(&self.storage.image_dir)?;
        if let Some(parent) = self.storage.log_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl UploadConfig {
    pub fn initial_wait(&self) -> Duration {
        Duration::from_secs(self.initial_wait_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
