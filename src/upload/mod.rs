//! # Upload Module
//!
//! Ships spooled files to the remote collector.
//!
//! This module handles:
//! - Choosing one batch per cycle (oldest finished CSV plus its images, or
//!   every image when no CSV at all is pending)
//! - Attaching a tail of the process log
//! - Sending the batch as one multipart POST
//! - Deleting exactly the sent files once the collector answers 2xx
//!
//! Delivery is at-least-once: a crash between the acknowledgment and the
//! deletion makes the same files go out again on the next cycle.

pub mod log_excerpt;
pub mod transport;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Result, SpoolerError};
use crate::scheduler::{CycleResult, ScheduledJob};
use crate::spool::timestamp::csv_cutoff;
use crate::spool::SpoolStore;
use log_excerpt::LogExcerpt;
use transport::{BatchPayload, PayloadPart, UploadTransport, FIELD_CSV, FIELD_IMAGES, FIELD_LOG};

/// Longest slice of a rejection body worth logging
const MAX_LOGGED_BODY_CHARS: usize = 200;

/// Files picked for one upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub csv: Option<PathBuf>,
    pub images: Vec<PathBuf>,
    pub log: Option<LogExcerpt>,
}

impl Batch {
    pub fn part_count(&self) -> usize {
        usize::from(self.csv.is_some()) + self.images.len() + usize::from(self.log.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.part_count() == 0
    }
}

/// Result of one upload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Nothing was pending
    Idle,
    /// The collector acknowledged the batch and the files were purged
    Delivered {
        csv: Option<PathBuf>,
        images: usize,
        log: bool,
    },
    /// The collector answered with a non-2xx status
    Rejected { status: u16 },
    /// The request never got an answer
    TransportFailed,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Idle | UploadOutcome::Delivered { .. })
    }
}

/// Builds, sends and purges upload batches
pub struct UploadClient<T: UploadTransport> {
    transport: Arc<T>,
    spool: SpoolStore,
    log_file: Option<PathBuf>,
    log_excerpt_bytes: u64,
    retry_delay: Duration,
    cancel: CancellationToken,
}

impl<T: UploadTransport> UploadClient<T> {
    pub fn new(
        transport: Arc<T>,
        spool: SpoolStore,
        log_file: Option<PathBuf>,
        log_excerpt_bytes: u64,
        retry_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            spool,
            log_file,
            log_excerpt_bytes,
            retry_delay,
            cancel,
        }
    }

    pub fn from_config(
        transport: Arc<T>,
        spool: SpoolStore,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(
            transport,
            spool,
            Some(config.storage.log_file.clone()),
            config.upload.log_excerpt_bytes,
            config.upload.retry_delay(),
            cancel,
        )
    }

    /// Decide what to send, given the site-local date of today
    pub async fn plan_batch(&self, today: NaiveDate) -> Result<Batch> {
        let mut batch = Batch::default();

        if let Some(csv) = self.spool.uploadable_csv(today).await? {
            let cutoff = csv_cutoff(&csv, &self.spool.offset()).await?;
            batch.images = self.spool.pending_images(&cutoff).await?;
            debug!(
                "Selected {} with {} images up to {}",
                csv.display(),
                batch.images.len(),
                cutoff
            );
            batch.csv = Some(csv);
        } else if self.spool.pending_csv_files().await?.is_empty() {
            batch.images = self.spool.all_images().await?;
        } else {
            // Today's file is still open; its images wait for it
            debug!("Only today's CSV is pending, holding images back");
        }

        if let Some(path) = &self.log_file {
            match log_excerpt::read_tail(path, self.log_excerpt_bytes).await {
                Ok(excerpt) => batch.log = excerpt,
                Err(e) => warn!("Could not read log excerpt from {}: {}", path.display(), e),
            }
        }

        Ok(batch)
    }

    /// Run one upload attempt using today's site-local date
    pub async fn upload_once(&self) -> Result<UploadOutcome> {
        let today = Utc::now().with_timezone(&self.spool.offset()).date_naive();
        self.upload_for_day(today).await
    }

    /// Run one upload attempt, treating `today` as the day still being written
    pub async fn upload_for_day(&self, today: NaiveDate) -> Result<UploadOutcome> {
        let batch = self.plan_batch(today).await?;
        if batch.is_empty() {
            debug!("Nothing to upload");
            return Ok(UploadOutcome::Idle);
        }

        let (batch, payload) = load_payload(batch).await;
        if payload.parts.is_empty() {
            debug!("Selected files disappeared before upload");
            return Ok(UploadOutcome::Idle);
        }

        info!(
            "Uploading batch: csv={}, images={}, log={} ({} bytes)",
            batch
                .csv
                .as_deref()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "-".to_string()),
            payload.count(FIELD_IMAGES),
            payload.count(FIELD_LOG) > 0,
            payload.total_bytes()
        );

        let response = match self.transport.send_batch(&payload).await {
            Ok(response) => response,
            Err(SpoolerError::Http(e)) => {
                warn!(
                    "Network error talking to collector: {} - backing off {}s",
                    e,
                    self.retry_delay.as_secs()
                );
                self.retry_pause().await;
                return Ok(UploadOutcome::TransportFailed);
            }
            Err(e) => return Err(e),
        };

        if !response.is_success() {
            let body: String = response.body.chars().take(MAX_LOGGED_BODY_CHARS).collect();
            error!("Collector rejected upload: {} {}", response.status, body);
            return Ok(UploadOutcome::Rejected {
                status: response.status,
            });
        }

        Ok(self.purge(batch).await)
    }

    /// Delete everything the collector just acknowledged
    async fn purge(&self, batch: Batch) -> UploadOutcome {
        if let Some(csv) = &batch.csv {
            if let Err(e) = self.spool.purge(csv).await {
                error!("Uploaded {} but could not delete it: {}", csv.display(), e);
            }
        }

        for image in &batch.images {
            if let Err(e) = self.spool.purge(image).await {
                error!("Uploaded {} but could not delete it: {}", image.display(), e);
            }
        }

        let log = batch.log.is_some();
        if let (Some(excerpt), Some(path)) = (&batch.log, &self.log_file) {
            if let Err(e) = log_excerpt::discard_sent(path, excerpt.end_offset).await {
                warn!("Could not truncate {}: {}", path.display(), e);
            }
        }

        info!(
            "Uploaded & purged {} (+{} images)",
            batch
                .csv
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "no csv".to_string()),
            batch.images.len()
        );

        UploadOutcome::Delivered {
            csv: batch.csv,
            images: batch.images.len(),
            log,
        }
    }

    /// Pause after a network failure, cut short by shutdown
    async fn retry_pause(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.retry_delay) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}

/// Read every selected file into memory
///
/// Files that vanished or cannot be read are dropped from the batch, so they
/// are not purged later either.
async fn load_payload(mut batch: Batch) -> (Batch, BatchPayload) {
    let mut payload = BatchPayload::default();

    if let Some(csv) = batch.csv.take() {
        if let Some(bytes) = read_if_readable(&csv).await {
            payload.parts.push(part(FIELD_CSV, &csv, "text/csv", bytes));
            batch.csv = Some(csv);
        }
    }

    let mut images = Vec::with_capacity(batch.images.len());
    for image in batch.images.drain(..) {
        if let Some(bytes) = read_if_readable(&image).await {
            payload.parts.push(part(FIELD_IMAGES, &image, "image/jpeg", bytes));
            images.push(image);
        }
    }
    batch.images = images;

    if let Some(log) = &batch.log {
        payload.parts.push(PayloadPart {
            field: FIELD_LOG,
            file_name: log.file_name.clone(),
            mime: "text/plain",
            bytes: log.bytes.clone(),
        });
    }

    (batch, payload)
}

async fn read_if_readable(path: &Path) -> Option<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("{} vanished before upload", path.display());
            None
        }
        Err(e) => {
            error!("Cannot read {}, leaving it out of this batch: {}", path.display(), e);
            None
        }
    }
}

fn part(field: &'static str, path: &Path, mime: &'static str, bytes: Vec<u8>) -> PayloadPart {
    PayloadPart {
        field,
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        mime,
        bytes,
    }
}

#[async_trait]
impl<T: UploadTransport + 'static> ScheduledJob for UploadClient<T> {
    fn name(&self) -> &str {
        "upload"
    }

    async fn run_once(&self) -> anyhow::Result<CycleResult> {
        let outcome = self.upload_once().await?;
        Ok(if outcome.is_success() {
            CycleResult::Success
        } else {
            CycleResult::Failure
        })
    }
}
