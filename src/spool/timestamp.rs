//! # Spool File Timestamps
//!
//! Works out when a spooled file was produced. The file name is the primary
//! source; the modification time is the fallback when the name does not
//! carry a timestamp.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::path::Path;

use crate::error::{Result, SpoolerError};

/// Where a file's timestamp came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    FileName,
    ModifiedTime,
}

/// A file's timestamp together with how it was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimestamp {
    pub at: DateTime<FixedOffset>,
    pub source: TimestampSource,
}

fn stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

/// Turn the capture process's colon-free time (`12-30-45.1+02-00`) back
/// into RFC 3339 form (`12:30:45.1+02:00`)
fn restore_time_colons(time: &str) -> String {
    let mut out = String::with_capacity(time.len());
    let mut time_dashes = 0;
    let mut in_offset = false;

    for c in time.chars() {
        match c {
            '-' if !in_offset && time_dashes < 2 => {
                time_dashes += 1;
                out.push(':');
            }
            '-' if !in_offset => {
                in_offset = true;
                out.push('-');
            }
            '+' => {
                in_offset = true;
                out.push('+');
            }
            '-' => out.push(':'),
            other => out.push(other),
        }
    }
    out
}

/// Parse a timestamp embedded in an image file stem
///
/// Accepted forms, tried in order:
/// - RFC 3339 (`2025-06-01T12:30:45+00:00`)
/// - RFC 3339 with `-` in place of `:` (`2025-06-01T12-30-45.123456+00-00`)
/// - naive local time in either form, read in the site timezone
pub fn parse_name_timestamp(stem: &str, offset: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(stem) {
        return Some(ts);
    }

    let (date, time) = stem.split_once(['T', '_', ' '])?;
    let candidate = format!("{}T{}", date, restore_time_colons(time));

    if let Ok(ts) = DateTime::parse_from_rfc3339(&candidate) {
        return Some(ts);
    }

    let naive = NaiveDateTime::parse_from_str(&candidate, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    offset.from_local_datetime(&naive).single()
}

/// Parse a daily CSV stem (`2025-06-01`)
pub fn parse_name_date(stem: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

/// Modification time of `path` in the site timezone
pub async fn modified_time(path: &Path, offset: &FixedOffset) -> Result<DateTime<FixedOffset>> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    Ok(DateTime::<Utc>::from(modified).with_timezone(offset))
}

/// Timestamp of an image: from its name if possible, else its mtime
pub async fn image_timestamp(path: &Path, offset: &FixedOffset) -> Result<FileTimestamp> {
    if let Some(at) = stem(path).and_then(|s| parse_name_timestamp(s, offset)) {
        return Ok(FileTimestamp {
            at,
            source: TimestampSource::FileName,
        });
    }

    Ok(FileTimestamp {
        at: modified_time(path, offset).await?,
        source: TimestampSource::ModifiedTime,
    })
}

/// Calendar day a daily CSV file belongs to: from its name, else its mtime
pub async fn csv_date(path: &Path, offset: &FixedOffset) -> Result<NaiveDate> {
    if let Some(date) = stem(path).and_then(parse_name_date) {
        return Ok(date);
    }
    Ok(modified_time(path, offset).await?.date_naive())
}

/// Last instant of `date` in the site timezone
pub fn end_of_day(date: NaiveDate, offset: &FixedOffset) -> Result<DateTime<FixedOffset>> {
    let last = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
        .ok_or_else(|| SpoolerError::Timestamp("invalid end-of-day time".to_string()))?;
    offset
        .from_local_datetime(&date.and_time(last))
        .single()
        .ok_or_else(|| SpoolerError::Timestamp(format!("no end of day for {}", date)))
}

/// Cutoff for images belonging with a daily CSV file
pub async fn csv_cutoff(path: &Path, offset: &FixedOffset) -> Result<DateTime<FixedOffset>> {
    end_of_day(csv_date(path, offset).await?, offset)
}
