//! # Logging
//!
//! Sets up `tracing` with two sinks: the console and the local process log
//! file. The file is what the uploader attaches (and then truncates), so it
//! is written without ANSI colors, and identical records repeated within a
//! short window are only written once.

use anyhow::{anyhow, Context as _, Result};
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Metadata};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context, Filter, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tfmt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Install the global subscriber
///
/// `RUST_LOG` overrides the configured level. Keep the returned guard alive
/// for the lifetime of the process or buffered lines are lost.
pub fn init(log_file: &Path, config: &LoggingConfig) -> Result<WorkerGuard> {
    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .ok_or_else(|| anyhow!("log_file {} has no file name", log_file.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("invalid log level '{}'", config.level))?;

    let file_layer = tfmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(DedupFilter::new(Duration::from_secs(config.dedup_window_secs)));

    let stdout_layer = config.stdout.then(|| tfmt::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .context("logging already initialized")?;

    Ok(guard)
}

/// Per-layer filter dropping records identical to one let through less than
/// `window` ago
///
/// Two records are identical when level, target, message and fields all
/// match. A zero window lets everything through.
#[derive(Debug)]
pub struct DedupFilter {
    window: Duration,
    last_written: Mutex<HashMap<String, Instant>>,
}

impl DedupFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_written: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a record with `key` seen at `now` should be written
    fn admit(&self, key: String, now: Instant) -> bool {
        let Ok(mut last_written) = self.last_written.lock() else {
            return true;
        };

        last_written.retain(|_, at| now.saturating_duration_since(*at) < self.window);
        if last_written.contains_key(&key) {
            return false;
        }
        if !self.window.is_zero() {
            last_written.insert(key, now);
        }
        true
    }
}

impl<S> Filter<S> for DedupFilter {
    fn enabled(&self, _meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        true
    }

    fn event_enabled(&self, event: &Event<'_>, _cx: &Context<'_, S>) -> bool {
        let meta = event.metadata();
        let mut text = RecordText::default();
        event.record(&mut text);

        self.admit(
            format!("{} {} {}", meta.level(), meta.target(), text.0),
            Instant::now(),
        )
    }
}

/// Flattens an event's fields into one comparable string
#[derive(Default)]
struct RecordText(String);

impl Visit for RecordText {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.0, "{:?} ", value);
        } else {
            let _ = write!(self.0, "{}={:?} ", field.name(), value);
        }
    }
}
