//! Drives one file through reader, batches and post-processing.
//!
//! Strictly sequential: one file, one batch at a time, in file order. Async is
//! only there for file I/O.

use crate::batch::{Batch, ErrorLog, Progress, RunningStatistics, TrackedError, TrackedErrorKind};
use crate::config::ProcessorConfig;
use crate::io::{open_source, SourceMeta};
use crate::parse::{LineOutcome, RecordReader};
use crate::postprocess::{OutputFiles, PostProcessingOptions, PostProcessor};
use crate::record::Record;
use crate::stats::ProcessingResult;
use crate::{StreamError, StreamResult};
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type RecordFilter = Box<dyn Fn(&Record) -> bool + Send + Sync>;
type ProgressFn = Box<dyn FnMut(&Progress) + Send>;

/// Process one export with the given batch size and post-processing options.
///
/// Never fails: every problem ends up in the returned result, with
/// `success == false` for anything that stopped the file early.
pub async fn process_file(
    path: impl AsRef<Path>,
    batch_size: usize,
    enable_post_processing: bool,
    options: PostProcessingOptions,
) -> ProcessingResult {
    let config = ProcessorConfig {
        batch_size: Some(batch_size),
        enable_post_processing,
        post_processing: options,
        ..Default::default()
    };
    StreamProcessor::new(config).process_file(path.as_ref()).await
}

/// Reusable pipeline with optional record filter, progress and cancellation hooks.
///
/// Each `process_file` call owns its dedup set and output handles; running two
/// calls against the same output paths concurrently is unsupported.
pub struct StreamProcessor {
    config: ProcessorConfig,
    charset: &'static encoding_rs::Encoding,
    filter: Option<RecordFilter>,
    progress: Option<ProgressFn>,
    cancel: Option<CancellationToken>,
    estimated_total: Option<u64>,
}

/// Mutable state of one file run.
struct FileRun {
    started: Instant,
    running: RunningStatistics,
    errors: ErrorLog,
    post: Option<PostProcessor>,
    since_checkpoint: u64,
    cancelled: bool,
}

impl StreamProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            config,
            charset: encoding_rs::UTF_8,
            filter: None,
            progress: None,
            cancel: None,
            estimated_total: None,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Keep only records for which `filter` returns `true`; runs before post-processing.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Called after every batch.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: FnMut(&Progress) + Send + 'static,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Checked between batches; outputs are closed cleanly on cancel.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_charset(mut self, charset: &'static encoding_rs::Encoding) -> Self {
        self.charset = charset;
        self
    }

    pub fn with_estimated_total(mut self, rows: Option<u64>) -> Self {
        self.estimated_total = rows;
        self
    }

    pub async fn process_file(&mut self, path: &Path) -> ProcessingResult {
        let mut run = FileRun {
            started: Instant::now(),
            running: RunningStatistics::default(),
            errors: ErrorLog::new(self.config.max_tracked_errors),
            post: None,
            since_checkpoint: 0,
            cancelled: false,
        };

        info!(path = %path.display(), batch_size = self.config.effective_batch_size(), "processing export");
        let outcome = self.drive(path, &mut run).await;

        let (success, outputs) = match outcome {
            Ok(()) => match run.post.as_mut() {
                Some(post) => match post.finish().await {
                    Ok(outputs) => (!run.cancelled, outputs),
                    Err(e) => {
                        run.errors.push_fatal(fatal(&e));
                        (false, OutputFiles::default())
                    }
                },
                None => (!run.cancelled, OutputFiles::default()),
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "processing failed");
                if let Some(post) = run.post.as_mut() {
                    post.abort().await;
                }
                run.errors.push_fatal(fatal(&e));
                (false, OutputFiles::default())
            }
        };
        if run.cancelled {
            run.errors.push_fatal(TrackedError {
                kind: TrackedErrorKind::Cancelled,
                line: None,
                message: StreamError::Cancelled.to_string(),
            });
        }
        run.running.elapsed = run.started.elapsed();

        let defaults = PostProcessingOptions::default();
        let options = run.post.as_ref().map_or(&defaults, |p| p.options());
        let result = ProcessingResult::build(
            success,
            path.to_path_buf(),
            &run.running,
            run.post.as_ref().map(|p| p.statistics()),
            options,
            self.config.top_n,
            outputs,
            run.errors.clone().into_parts(),
            run.cancelled,
        );
        info!(
            path = %path.display(),
            success = result.success,
            records = result.record_count,
            retained = result.accounting.retained,
            seconds = result.performance.duration_seconds,
            "finished export"
        );
        result
    }

    async fn drive(&mut self, path: &Path, run: &mut FileRun) -> StreamResult<()> {
        let batch_size = self.config.effective_batch_size();
        if batch_size == 0 {
            return Err(StreamError::Config("batch size must be greater than zero".into()));
        }

        let meta = SourceMeta {
            charset: self.charset,
            buffer_capacity: self.config.buffer_capacity,
            ..Default::default()
        };
        let (source, meta) = open_source(path, meta).await?;
        debug!(name = %meta.name_hint, compression = ?meta.compression, "opened source");

        let mut reader =
            RecordReader::new(source, self.config.buffer_capacity, self.config.malformed_policy).await?;
        if self.config.enable_post_processing {
            self.config.post_processing.check_output_paths(path).await?;
            run.post = Some(PostProcessor::new(
                self.config.post_processing.clone(),
                std::sync::Arc::clone(reader.schema()),
                path,
            ));
        }

        let mut batch = Batch::new(batch_size);
        while let Some(outcome) = reader.next_line().await? {
            run.running.lines_read += 1;
            match outcome {
                LineOutcome::Record(record) => {
                    run.running.total_records += 1;
                    if batch.push(record) {
                        self.flush(&mut batch, run).await?;
                        if self.is_cancelled() {
                            run.cancelled = true;
                            info!(path = %path.display(), lines = run.running.lines_read, "cancelled between batches");
                            return Ok(());
                        }
                    }
                }
                LineOutcome::Malformed(line) => {
                    debug!(line = line.line, message = %line.message, "skipping malformed line");
                    run.running.malformed_skipped += 1;
                    run.errors.push(TrackedError::from(&line));
                }
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch, run).await?;
        }
        Ok(())
    }

    async fn flush(&mut self, batch: &mut Batch, run: &mut FileRun) -> StreamResult<()> {
        let batch_bytes = batch.approx_bytes();
        let mut records = batch.take();
        let taken = records.len() as u64;

        if let Some(filter) = self.filter.as_ref() {
            let before = records.len();
            records.retain(|r| filter(r));
            run.running.caller_filtered += (before - records.len()) as u64;
        }

        let retained = match run.post.as_mut() {
            Some(post) => post.process_batch(records).await?,
            None => records,
        };
        run.running.absorb(&retained);
        run.running.batches += 1;

        let key_bytes = run
            .post
            .as_ref()
            .map_or(0, |p| p.duplicate_keys().approx_bytes());
        run.running.observe_memory(batch_bytes + key_bytes);

        let elapsed = run.started.elapsed();
        run.running.elapsed = elapsed;
        let snapshot = Progress {
            records_processed: run.running.lines_read,
            batches: run.running.batches,
            elapsed,
            estimated_total: self.estimated_total,
        };
        debug!(
            batch = run.running.batches,
            records = taken,
            retained = retained.len(),
            percent = ?snapshot.percent(),
            "flushed batch"
        );

        if let Some(progress) = self.progress.as_mut() {
            progress(&snapshot);
        }

        run.since_checkpoint += taken;
        if self.config.checkpoint_interval > 0 && run.since_checkpoint >= self.config.checkpoint_interval {
            run.since_checkpoint = 0;
            debug!(
                lines = run.running.lines_read,
                peak_bytes = run.running.peak_memory_bytes,
                "checkpoint"
            );
            if self.config.yield_on_checkpoint {
                tokio::task::yield_now().await;
            }
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

fn fatal(err: &StreamError) -> TrackedError {
    let kind = match err {
        StreamError::EmptyPath | StreamError::NotFound(_) => TrackedErrorKind::EmptyOrInvalidPath,
        StreamError::Config(_) => TrackedErrorKind::InvalidConfiguration,
        StreamError::Cancelled => TrackedErrorKind::Cancelled,
        _ => TrackedErrorKind::IoFailure,
    };
    TrackedError {
        kind,
        line: None,
        message: err.to_string(),
    }
}
