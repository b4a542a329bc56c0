//! # Spool Module
//!
//! The on-disk queue of files waiting to be uploaded.
//!
//! A file's presence in the spool means the collector has not acknowledged
//! it yet. Nothing is cached in memory: every question is answered from a
//! fresh directory listing, so a restarted process picks up exactly where
//! the previous one stopped.

pub mod timestamp;

use chrono::{DateTime, FixedOffset, NaiveDate};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;
use timestamp::{csv_date, image_timestamp, TimestampSource};

const CSV_EXTENSIONS: &[&str] = &["csv"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

/// Snapshot of what is waiting in the spool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpoolUsage {
    pub pending_csv: usize,
    pub pending_images: usize,
    pub pending_bytes: u64,
}

/// Filesystem-backed view of pending CSV files and images
#[derive(Debug, Clone)]
pub struct SpoolStore {
    data_dir: PathBuf,
    image_dir: PathBuf,
    offset: FixedOffset,
}

impl SpoolStore {
    pub fn new(data_dir: impl Into<PathBuf>, image_dir: impl Into<PathBuf>, offset: FixedOffset) -> Self {
        Self {
            data_dir: data_dir.into(),
            image_dir: image_dir.into(),
            offset,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// All daily CSV files, oldest first
    pub async fn pending_csv_files(&self) -> Result<Vec<PathBuf>> {
        list_sorted(&self.data_dir, CSV_EXTENSIONS).await
    }

    /// Oldest CSV file whose day is over
    ///
    /// A file dated `today` (or later, if the clock went backwards) is still
    /// being appended to by the writer and is never handed to the uploader.
    pub async fn uploadable_csv(&self, today: NaiveDate) -> Result<Option<PathBuf>> {
        for path in self.pending_csv_files().await? {
            match csv_date(&path, &self.offset).await {
                Ok(date) if date < today => return Ok(Some(path)),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable spool file {}: {}", path.display(), e),
            }
        }
        Ok(None)
    }

    /// Images taken at or before `cutoff`, in name order
    pub async fn pending_images(&self, cutoff: &DateTime<FixedOffset>) -> Result<Vec<PathBuf>> {
        let mut selected = Vec::new();
        for path in self.all_images().await? {
            match image_timestamp(&path, &self.offset).await {
                Ok(ts) => {
                    if ts.source == TimestampSource::ModifiedTime {
                        debug!(
                            "No timestamp in name of {}, using modification time",
                            path.display()
                        );
                    }
                    if ts.at <= *cutoff {
                        selected.push(path);
                    }
                }
                // Usually the file was consumed between listing and stat
                Err(e) => warn!("Skipping image {}: {}", path.display(), e),
            }
        }
        Ok(selected)
    }

    /// Every pending image, in name order
    pub async fn all_images(&self) -> Result<Vec<PathBuf>> {
        list_sorted(&self.image_dir, IMAGE_EXTENSIONS).await
    }

    /// Count and size of everything pending
    pub async fn usage(&self) -> Result<SpoolUsage> {
        let csvs = self.pending_csv_files().await?;
        let images = self.all_images().await?;

        let mut pending_bytes = 0;
        for path in csvs.iter().chain(images.iter()) {
            if let Ok(meta) = tokio::fs::metadata(path).await {
                pending_bytes += meta.len();
            }
        }

        Ok(SpoolUsage {
            pending_csv: csvs.len(),
            pending_images: images.len(),
            pending_bytes,
        })
    }

    /// Remove an acknowledged file
    ///
    /// Already-missing files are fine: deleting twice is harmless.
    pub async fn purge(&self, path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// Regular files in `dir` with one of `extensions`, sorted by name
///
/// A missing directory is an empty spool.
async fn list_sorted(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && has_extension(&path, extensions) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
