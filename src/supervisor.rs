//! # Supervisor
//!
//! Starts the independent workers and shuts them down together.
//!
//! The workers share no memory. Ingestion writes daily CSV files; the upload
//! scheduler reads and deletes them. The spool directory is the only hand-off.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::heartbeat::HeartbeatReporter;
use crate::scheduler::UploadScheduler;
use crate::serial::SerialLineSource;
use crate::spool::SpoolStore;
use crate::upload::transport::ReqwestTransport;
use crate::upload::UploadClient;
use crate::writer::{run_ingestion, SampleWriter};

/// Owns the process-wide shutdown token and the worker tasks
pub struct Supervisor {
    config: Config,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops every worker when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until SIGINT/SIGTERM (or the token is cancelled), then join workers
    pub async fn run(self) -> Result<()> {
        let offset = self.config.site_offset()?;
        let storage = &self.config.storage;

        let spool = SpoolStore::new(&storage.data_dir, &storage.image_dir, offset);
        let transport = Arc::new(
            ReqwestTransport::from_config(&self.config).context("Failed to create HTTP client")?,
        );

        let mut workers: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        let source = SerialLineSource::from_config(&self.config.serial, self.cancel.clone());
        let writer = SampleWriter::new(&storage.data_dir, offset);
        workers.push((
            "ingestion",
            tokio::spawn(run_ingestion(source, writer, self.cancel.clone())),
        ));

        let uploader = UploadClient::from_config(
            Arc::clone(&transport),
            spool.clone(),
            &self.config,
            self.cancel.clone(),
        );
        let upload_scheduler = UploadScheduler::new(
            Arc::new(uploader),
            self.config.upload.initial_wait(),
            self.config.upload.interval(),
            self.cancel.clone(),
        );
        workers.push((
            "upload",
            tokio::spawn(async move {
                upload_scheduler.run().await;
            }),
        ));

        if self.config.heartbeat.enabled {
            let reporter = HeartbeatReporter::new(
                Arc::clone(&transport),
                spool.clone(),
                self.config.heartbeat.min_free_mb,
            );
            let heartbeat_scheduler = UploadScheduler::new(
                Arc::new(reporter),
                std::time::Duration::ZERO,
                std::time::Duration::from_secs(self.config.heartbeat.interval_secs),
                self.cancel.clone(),
            );
            workers.push((
                "heartbeat",
                tokio::spawn(async move {
                    heartbeat_scheduler.run().await;
                }),
            ));
        }

        info!("Started {} workers", workers.len());

        wait_for_shutdown(&self.cancel).await;
        self.cancel.cancel();

        for (name, handle) in workers {
            if let Err(e) = handle.await {
                error!("{} worker ended abnormally: {}", name, e);
            }
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Resolve on Ctrl+C, SIGTERM, or an external cancellation
async fn wait_for_shutdown(cancel: &CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
        _ = cancel.cancelled() => info!("Shutdown requested"),
    }
}
