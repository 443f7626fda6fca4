//! Batching and running counts.

use crate::parse::MalformedLine;
use crate::record::Record;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Ordered records, never more than `limit`.
#[derive(Debug)]
pub struct Batch {
    records: Vec<Record>,
    limit: usize,
    bytes: usize,
}

impl Batch {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            // Avoid reserving 50k slots up front for tiny files.
            records: Vec::with_capacity(limit.min(4096)),
            limit,
            bytes: 0,
        }
    }

    /// Append a record; `true` once the batch has reached its limit.
    pub fn push(&mut self, record: Record) -> bool {
        debug_assert!(self.records.len() < self.limit);
        self.bytes += record.approx_bytes();
        self.records.push(record);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn approx_bytes(&self) -> usize {
        self.bytes
    }

    /// Hand the records over in file order and start an empty batch.
    pub fn take(&mut self) -> Vec<Record> {
        self.bytes = 0;
        let next = Vec::with_capacity(self.records.len());
        std::mem::replace(&mut self.records, next)
    }
}

/// Counts accumulated across batches of one file. Never decrease.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunningStatistics {
    /// Data rows read, well-formed or not
    pub lines_read: u64,
    /// Well-formed records handed to batching
    pub total_records: u64,
    pub malformed_skipped: u64,
    /// Dropped by the caller's predicate
    pub caller_filtered: u64,
    /// Records that survived every stage and were counted below
    pub retained: u64,
    pub batches: u64,
    pub by_process: HashMap<String, u64>,
    pub by_operation: HashMap<String, u64>,
    pub by_result: HashMap<String, u64>,
    pub elapsed: Duration,
    pub peak_memory_bytes: usize,
}

impl RunningStatistics {
    pub fn absorb(&mut self, retained: &[Record]) {
        for record in retained {
            self.retained += 1;
            bump(&mut self.by_process, record.process_name());
            bump(&mut self.by_operation, record.operation());
            bump(&mut self.by_result, record.result());
        }
    }

    pub fn observe_memory(&mut self, bytes: usize) {
        self.peak_memory_bytes = self.peak_memory_bytes.max(bytes);
    }
}

fn bump(counts: &mut HashMap<String, u64>, key: Option<&str>) {
    let key = key.unwrap_or_default();
    if let Some(n) = counts.get_mut(key) {
        *n += 1;
    } else {
        counts.insert(key.to_string(), 1);
    }
}

/// Snapshot handed to progress callbacks after every batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub records_processed: u64,
    pub batches: u64,
    pub elapsed: Duration,
    pub estimated_total: Option<u64>,
}

impl Progress {
    pub fn percent(&self) -> Option<f64> {
        self.estimated_total
            .filter(|t| *t > 0)
            .map(|t| (self.records_processed as f64 / t as f64 * 100.0).min(100.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackedErrorKind {
    MalformedLine,
    IoFailure,
    EmptyOrInvalidPath,
    InvalidConfiguration,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedError {
    pub kind: TrackedErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    pub message: String,
}

impl From<&MalformedLine> for TrackedError {
    fn from(m: &MalformedLine) -> Self {
        Self {
            kind: TrackedErrorKind::MalformedLine,
            line: Some(m.line),
            message: m.message.clone(),
        }
    }
}

/// Keeps the first `max` errors and only counts the rest.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    max: usize,
    entries: Vec<TrackedError>,
    overflow: u64,
}

impl ErrorLog {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            entries: Vec::new(),
            overflow: 0,
        }
    }

    pub fn push(&mut self, error: TrackedError) {
        if self.entries.len() < self.max {
            self.entries.push(error);
        } else {
            self.overflow += 1;
        }
    }

    /// Fatal errors are always kept, even past the cap.
    pub fn push_fatal(&mut self, error: TrackedError) {
        self.entries.push(error);
    }

    pub fn entries(&self) -> &[TrackedError] {
        &self.entries
    }

    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    pub fn into_parts(self) -> (Vec<TrackedError>, u64) {
        (self.entries, self.overflow)
    }
}
