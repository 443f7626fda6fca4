//! Line reader and record parser.
//!
//! Quoting follows RFC 4180 as implemented by `csv-async`: a field opened with
//! `"` may hold commas, newlines and `""` escapes. Rows whose width differs from
//! the header are reported as [`LineOutcome::Malformed`] rather than errors, so
//! the caller decides what to do with them.

use crate::record::{Record, Schema};
use crate::{StreamError, StreamResult};
use csv_async::{AsyncReader, AsyncReaderBuilder, ByteRecord};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncRead;

const UTF8_BOM: &str = "\u{feff}";

/// What to do with a row whose field count does not match the header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Drop the row and count it as malformed.
    #[default]
    Skip,
    /// Pad short rows with empty fields; trailing empty extras are trimmed.
    Pad,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MalformedLine {
    pub line: u64,
    pub expected_fields: usize,
    pub actual_fields: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Record(Record),
    Malformed(MalformedLine),
}

/// Lazily yields one [`LineOutcome`] per data row of a single export.
///
/// Open a new reader to start over; there is no mid-stream resume.
pub struct RecordReader<R> {
    rdr: AsyncReader<R>,
    schema: Arc<Schema>,
    policy: MalformedPolicy,
    raw: ByteRecord,
    rows_read: u64,
}

impl<R> RecordReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Read the header row and prepare for streaming.
    pub async fn new(reader: R, buffer_capacity: usize, policy: MalformedPolicy) -> StreamResult<Self> {
        let mut rdr = AsyncReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .buffer_capacity(buffer_capacity.max(1))
            .create_reader(reader);

        let headers = rdr
            .byte_headers()
            .await?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let name = String::from_utf8_lossy(h);
                let name: &str = if i == 0 {
                    name.trim_start_matches(UTF8_BOM)
                } else {
                    name.as_ref()
                };
                name.trim().to_string()
            })
            .collect::<Vec<_>>();

        Ok(Self {
            rdr,
            schema: Arc::new(Schema::new(headers)),
            policy,
            raw: ByteRecord::new(),
            rows_read: 0,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Data rows seen so far, well-formed or not.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Next data row, or `None` at end of file.
    ///
    /// Only I/O failures surface as `Err`; everything else about a bad row is
    /// folded into [`LineOutcome::Malformed`].
    pub async fn next_line(&mut self) -> StreamResult<Option<LineOutcome>> {
        match self.rdr.read_byte_record(&mut self.raw).await {
            Ok(false) => Ok(None),
            Ok(true) => {
                self.rows_read += 1;
                let line = self.current_line();
                Ok(Some(self.shape(line)))
            }
            Err(err) if matches!(err.kind(), csv_async::ErrorKind::Io(_)) => Err(StreamError::Csv(err)),
            Err(err) => {
                self.rows_read += 1;
                let line = self.rows_read + 1;
                Ok(Some(LineOutcome::Malformed(MalformedLine {
                    line,
                    expected_fields: self.schema.width(),
                    actual_fields: 0,
                    message: err.to_string(),
                })))
            }
        }
    }

    fn current_line(&self) -> u64 {
        self.raw
            .position()
            .map(|p| p.line())
            .unwrap_or(self.rows_read + 1)
    }

    fn shape(&self, line: u64) -> LineOutcome {
        let expected = self.schema.width();
        let actual = self.raw.len();

        let mut values = Vec::with_capacity(expected.max(actual));
        for field in self.raw.iter() {
            match std::str::from_utf8(field) {
                Ok(s) => values.push(s.to_string()),
                Err(e) => {
                    return LineOutcome::Malformed(MalformedLine {
                        line,
                        expected_fields: expected,
                        actual_fields: actual,
                        message: format!("invalid UTF-8 in field {}: {e}", values.len() + 1),
                    })
                }
            }
        }

        if actual == expected {
            return LineOutcome::Record(Record::new(line, Arc::clone(&self.schema), values));
        }

        if self.policy == MalformedPolicy::Pad {
            if actual < expected {
                values.resize(expected, String::new());
                return LineOutcome::Record(Record::new(line, Arc::clone(&self.schema), values));
            }
            if values[expected..].iter().all(|v| v.trim().is_empty()) {
                values.truncate(expected);
                return LineOutcome::Record(Record::new(line, Arc::clone(&self.schema), values));
            }
        }

        LineOutcome::Malformed(MalformedLine {
            line,
            expected_fields: expected,
            actual_fields: actual,
            message: format!("expected {expected} fields, found {actual}"),
        })
    }

    /// Adapt into a `Stream`, for callers that prefer combinators.
    pub fn into_stream(self) -> impl Stream<Item = StreamResult<LineOutcome>>
    where
        R: 'static,
    {
        futures::stream::unfold(Some(self), |state| async move {
            let mut reader = state?;
            match reader.next_line().await {
                Ok(Some(outcome)) => Some((Ok(outcome), Some(reader))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
