//! # Heartbeat Module
//!
//! Periodic "still alive" report to the collector with the device's name,
//! clock, free disk space and spool backlog.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::scheduler::{CycleResult, ScheduledJob};
use crate::spool::SpoolStore;
use crate::upload::transport::UploadTransport;

/// JSON body of a heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeartbeatReport {
    pub device_id: String,
    pub time: String,
    pub free_bytes: Option<u64>,
    pub low_space: bool,
    pub pending_csv: usize,
    pub pending_images: usize,
    pub pending_bytes: u64,
}

/// Builds and sends heartbeat reports
pub struct HeartbeatReporter<T: UploadTransport> {
    transport: Arc<T>,
    spool: SpoolStore,
    min_free_bytes: u64,
}

impl<T: UploadTransport> HeartbeatReporter<T> {
    pub fn new(transport: Arc<T>, spool: SpoolStore, min_free_mb: u64) -> Self {
        Self {
            transport,
            spool,
            min_free_bytes: min_free_mb.saturating_mul(1024 * 1024),
        }
    }

    /// Snapshot the device state
    pub async fn build_report(&self) -> crate::error::Result<HeartbeatReport> {
        let usage = self.spool.usage().await?;

        let free_bytes = match fs2::available_space(self.spool.data_dir()) {
            Ok(free) => Some(free),
            Err(e) => {
                debug!("Cannot stat free space on {}: {}", self.spool.data_dir().display(), e);
                None
            }
        };

        let low_space = free_bytes.is_some_and(|free| free < self.min_free_bytes);
        if low_space {
            warn!(
                "Low disk space: {} MB free, {} files waiting to upload",
                free_bytes.unwrap_or(0) / (1024 * 1024),
                usage.pending_csv + usage.pending_images
            );
        }

        Ok(HeartbeatReport {
            device_id: device_id(),
            time: Utc::now()
                .with_timezone(&self.spool.offset())
                .to_rfc3339_opts(SecondsFormat::Secs, false),
            free_bytes,
            low_space,
            pending_csv: usage.pending_csv,
            pending_images: usage.pending_images,
            pending_bytes: usage.pending_bytes,
        })
    }
}

fn device_id() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[async_trait]
impl<T: UploadTransport + 'static> ScheduledJob for HeartbeatReporter<T> {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn run_once(&self) -> anyhow::Result<CycleResult> {
        let report = self.build_report().await?;

        match self.transport.send_heartbeat(&report).await {
            Ok(reply) if reply.is_success() => {
                debug!("Heartbeat OK");
                Ok(CycleResult::Success)
            }
            Ok(reply) => {
                warn!("Heartbeat rejected with status {}", reply.status);
                Ok(CycleResult::Failure)
            }
            Err(e) => {
                warn!("Heartbeat failed: {}", e);
                Ok(CycleResult::Failure)
            }
        }
    }
}
