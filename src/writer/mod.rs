//! # Sample Writer Module
//!
//! Persists sensor lines to one CSV file per calendar day.
//!
//! This module handles:
//! - Stamping each line with the site-local time
//! - Choosing `<data_dir>/<YYYY-MM-DD>.csv` from that timestamp
//! - Writing the header exactly once, when the day's file is created
//! - Appending rows, never rewriting them
//! - The ingestion worker loop tying the serial source to the writer

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::serial::port_trait::PortOpener;
use crate::serial::{LineEvent, SerialLineSource};

/// Delimiter the sensor firmware puts between its fields
pub const FIRMWARE_DELIMITER: char = ';';

/// Separator used in the CSV files we write
///
/// The firmware may emit locale-formatted decimals (`21,5`), so a comma is
/// not safe here.
pub const CSV_SEPARATOR: char = ';';

/// Column names, in the order the firmware emits its fields
pub const SENSOR_COLUMNS: &[&str] = &["Temperature [C]", "Humidity", "Light", "Voltage L.Sensor"];

/// Appends timestamped sensor rows to daily CSV files
#[derive(Debug, Clone)]
pub struct SampleWriter {
    data_dir: PathBuf,
    offset: FixedOffset,
}

impl SampleWriter {
    pub fn new(data_dir: impl Into<PathBuf>, offset: FixedOffset) -> Self {
        Self {
            data_dir: data_dir.into(),
            offset,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Current time in the site timezone
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    /// Path of the CSV file holding samples from `timestamp`'s day
    pub fn path_for(&self, timestamp: &DateTime<FixedOffset>) -> PathBuf {
        let local = timestamp.with_timezone(&self.offset);
        self.data_dir
            .join(format!("{}.csv", local.date_naive().format("%Y-%m-%d")))
    }

    /// Stamp `line` with the current time and append it
    ///
    /// Returns the file written to, or `None` if the line was blank.
    pub async fn append(&self, line: &str) -> Result<Option<PathBuf>> {
        self.append_at(line, self.now()).await
    }

    /// Append `line` as a sample received at `timestamp`
    pub async fn append_at(
        &self,
        line: &str,
        timestamp: DateTime<FixedOffset>,
    ) -> Result<Option<PathBuf>> {
        let line = line.trim();
        if line.is_empty() {
            debug!("Skipping empty serial line");
            return Ok(None);
        }

        let timestamp = timestamp.with_timezone(&self.offset);
        let path = self.path_for(&timestamp);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        // A zero-length file means we created it (or a previous header write
        // never landed); either way it still needs its header.
        let mut out = String::new();
        if file.metadata().await?.len() == 0 {
            out.push_str(&header_row());
            info!("Started new daily file {}", path.display());
        }
        out.push_str(&format_row(&timestamp, line));

        file.write_all(out.as_bytes()).await?;
        file.flush().await?;

        debug!("Appended sample to {}: {}", path.display(), line);
        Ok(Some(path))
    }
}

/// Header line, terminated by a newline
pub fn header_row() -> String {
    let mut row = String::from("timestamp");
    for column in SENSOR_COLUMNS {
        row.push(CSV_SEPARATOR);
        row.push_str(&escape_field(column));
    }
    row.push('\n');
    row
}

/// One CSV row: timestamp, then the firmware's fields
pub fn format_row(timestamp: &DateTime<FixedOffset>, line: &str) -> String {
    let mut row = timestamp.to_rfc3339_opts(SecondsFormat::Secs, false);
    for field in line.split(FIRMWARE_DELIMITER) {
        row.push(CSV_SEPARATOR);
        row.push_str(&escape_field(field.trim()));
    }
    row.push('\n');
    row
}

fn escape_field(field: &str) -> String {
    if field.contains(CSV_SEPARATOR) || field.contains('"') || field.contains(['\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Ingestion worker: read lines until shutdown, persisting each one
///
/// A failed write is logged and the loop moves on to the next line.
pub async fn run_ingestion<O: PortOpener>(
    mut source: SerialLineSource<O>,
    writer: SampleWriter,
    cancel: CancellationToken,
) {
    info!("Ingestion worker started, writing to {}", writer.data_dir().display());
    let mut written: u64 = 0;

    loop {
        match source.next_line().await {
            LineEvent::Line(line) => match writer.append(&line).await {
                Ok(Some(_)) => written += 1,
                Ok(None) => {}
                Err(e) => error!("Failed to persist sample '{}': {}", line, e),
            },
            LineEvent::Idle => {
                debug!("No serial data within read timeout");
            }
            LineEvent::Shutdown => break,
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    source.close();
    info!("Ingestion worker stopped after {} samples", written);
}
