//! # Sensor Spooler Library
//!
//! Field-side agent of an edge-to-cloud telemetry pipeline.
//!
//! Reads lines from a serial sensor board, persists them as daily CSV files,
//! and periodically ships finished files (plus camera images) to a remote
//! collector over HTTP, deleting local copies only after the collector
//! acknowledges them.

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod logging;
pub mod scheduler;
pub mod serial;
pub mod spool;
pub mod supervisor;
pub mod upload;
pub mod writer;
