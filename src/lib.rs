//! Streaming ingestion and post-processing of Process Monitor CSV exports.
//!
//! - Reads exports line by line through a bounded buffer (plain, gzip or zstd).
//! - Groups rows into fixed-size batches, in file order.
//! - Post-processes each batch: validate, sanitize, dedup, success-filter, retain.
//! - Writes a `-cleaned` CSV and an `Archive/` CSV of filtered successes.
//! - Summarizes counts, rates and throughput into a [`ProcessingResult`].
//!
//! Data shape:
//! - Rows: [`Record`] (positional values against a shared [`Schema`])
//! - Per-line problems: [`LineOutcome::Malformed`], never an `Err`
//! - Only setup and I/O failures are [`StreamError`]s, and [`process_file`]
//!   folds those into a failed result as well.
#![cfg_attr(docsrs, feature(doc_cfg))]
//
mod batch;
mod codec;
mod config;
#[cfg(feature = "fast_local")]
mod fast;
mod io;
mod parse;
mod postprocess;
mod processor;
mod record;
mod stats;

pub use crate::batch::{
    Batch, ErrorLog, Progress, RunningStatistics, TrackedError, TrackedErrorKind,
};
pub use crate::config::{load_config, BatchProfile, ProcessorConfig};
#[cfg(feature = "fast_local")]
pub use crate::fast::fast_local_count;
pub use crate::io::{build_source_reader, open_source, Compression, SourceMeta, DEFAULT_BUFFER_CAPACITY};
pub use crate::parse::{LineOutcome, MalformedLine, MalformedPolicy, RecordReader};
pub use crate::postprocess::{
    content_key, sanitize_field, Disposition, DuplicateKeySet, OutputFile, OutputFiles,
    PostProcessingOptions, PostProcessingStatistics, PostProcessor,
};
pub use crate::processor::{process_file, StreamProcessor};
pub use crate::record::{Record, Schema};
pub use crate::stats::{
    CategoryBreakdown, CountEntry, DataQuality, LineAccounting, PerformanceSummary,
    PostProcessingReport, ProcessingResult, StatisticsSummary,
};

pub use tokio_util::sync::CancellationToken;

use std::path::PathBuf;
use thiserror::Error;

/// Error type for failures that abort a whole file.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("input path is empty")]
    EmptyPath,
    #[error("input file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("processing cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv_async::Error),
}

pub type StreamResult<T> = std::result::Result<T, StreamError>;
