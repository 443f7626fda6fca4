//! Per-record post-processing: validate, sanitize, dedup, success-filter, retain.
//!
//! The stage order is fixed. Duplicate detection runs before the success
//! filter, so a repeated SUCCESS row is counted once as success-filtered and
//! afterwards as a duplicate, never twice as success.

use crate::record::{self, Record, Schema};
use crate::{StreamError, StreamResult};
use crc32fast::Hasher as Crc32;
use csv_async::{AsyncWriter, AsyncWriterBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tokio::fs::File;
use tracing::{debug, warn};

const UNIT_SEPARATOR: u8 = 0x1f;
const RECORD_SEPARATOR: u8 = 0x1e;

/// Immutable post-processing configuration, fixed for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct PostProcessingOptions {
    #[serde(alias = "filter_success_results")]
    pub filter_success_results: bool,
    #[serde(alias = "remove_duplicates")]
    pub remove_duplicates: bool,
    #[serde(alias = "sanitize_data")]
    pub sanitize_data: bool,
    #[serde(alias = "validate_fields")]
    pub validate_fields: bool,
    #[serde(alias = "create_archive")]
    pub create_archive: bool,
    #[serde(alias = "create_separate_outputs")]
    pub create_separate_outputs: bool,
    #[serde(alias = "archive_directory")]
    pub archive_directory: String,
    #[serde(alias = "cleaned_output_suffix")]
    pub cleaned_output_suffix: String,
    #[serde(alias = "success_indicators")]
    pub success_indicators: Vec<String>,
    #[serde(alias = "required_fields")]
    pub required_fields: Vec<String>,
}

impl Default for PostProcessingOptions {
    fn default() -> Self {
        Self {
            filter_success_results: true,
            remove_duplicates: true,
            sanitize_data: true,
            validate_fields: true,
            create_archive: true,
            create_separate_outputs: true,
            archive_directory: "Archive".to_string(),
            cleaned_output_suffix: "-cleaned".to_string(),
            success_indicators: vec!["SUCCESS".to_string()],
            required_fields: [
                record::TIME_OF_DAY,
                record::PROCESS_NAME,
                record::OPERATION,
                record::PATH,
                record::RESULT,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl PostProcessingOptions {
    pub fn is_success(&self, result: &str) -> bool {
        let result = result.trim();
        self.success_indicators
            .iter()
            .any(|s| s.trim().eq_ignore_ascii_case(result))
    }

    /// `<dir>/<stem><suffix>.csv`
    pub fn cleaned_path(&self, input: &Path) -> PathBuf {
        let stem = export_stem(input);
        sibling_dir(input).join(format!("{stem}{}.csv", self.cleaned_output_suffix))
    }

    /// `<dir>/<archive_directory>/<stem>-archive.csv`
    pub fn archive_path(&self, input: &Path) -> PathBuf {
        let stem = export_stem(input);
        sibling_dir(input)
            .join(&self.archive_directory)
            .join(format!("{stem}-archive.csv"))
    }

    /// Fails when an output that would be created resolves to the input or to
    /// the other output. Checked before any output is opened.
    pub async fn check_output_paths(&self, input: &Path) -> StreamResult<()> {
        let source = resolve(input).await;
        let cleaned = if self.create_separate_outputs {
            Some(resolve(&self.cleaned_path(input)).await)
        } else {
            None
        };
        let archive = if self.filter_success_results && self.create_archive {
            Some(resolve(&self.archive_path(input)).await)
        } else {
            None
        };

        for (label, target) in [("cleaned", &cleaned), ("archive", &archive)] {
            if target.as_ref() == Some(&source) {
                return Err(StreamError::Config(format!(
                    "{label} output would overwrite the input {}",
                    input.display()
                )));
            }
        }
        if let (Some(c), Some(a)) = (&cleaned, &archive) {
            if c == a {
                return Err(StreamError::Config(format!(
                    "cleaned and archive outputs are the same file {}",
                    c.display()
                )));
            }
        }
        Ok(())
    }
}

/// Canonical form of a path that may not exist yet: the longest existing
/// prefix is canonicalized and the rest is applied lexically.
async fn resolve(path: &Path) -> PathBuf {
    let parts = path.components().collect::<Vec<_>>();
    for split in (0..=parts.len()).rev() {
        let prefix = parts[..split].iter().collect::<PathBuf>();
        let prefix = if prefix.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            prefix
        };
        let Ok(mut resolved) = tokio::fs::canonicalize(&prefix).await else {
            continue;
        };
        for part in &parts[split..] {
            match part {
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::Normal(name) => resolved.push(name),
                _ => {}
            }
        }
        return resolved;
    }
    path.to_path_buf()
}

fn sibling_dir(input: &Path) -> PathBuf {
    input
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// File name without compression and `.csv` extensions.
fn export_stem(input: &Path) -> String {
    let mut name = input
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("export")
        .to_string();
    for ext in [".gz", ".zst", ".csv"] {
        if name.len() > ext.len() && name.to_ascii_lowercase().ends_with(ext) {
            name.truncate(name.len() - ext.len());
        }
    }
    name
}

/// Where a record ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Invalid,
    Duplicate,
    SuccessFiltered,
    Retained,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessingStatistics {
    pub records_examined: u64,
    pub records_retained: u64,
    pub success_filtered: u64,
    pub duplicates_removed: u64,
    pub invalid_skipped: u64,
    pub sanitization_operations: u64,
    pub fields_modified: u64,
    pub records_archived: u64,
}

/// Content hashes seen during one run. Only grows.
#[derive(Debug, Default)]
pub struct DuplicateKeySet {
    keys: HashSet<u128>,
}

impl DuplicateKeySet {
    /// `true` when the key was not present before.
    pub fn insert(&mut self, key: u128) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn approx_bytes(&self) -> usize {
        self.keys.capacity() * (std::mem::size_of::<u128>() + 1)
    }
}

/// 128-bit truncated SHA-256 over the canonical identity columns.
pub fn content_key(record: &Record) -> u128 {
    let mut hasher = Sha256::new();
    let indices = record.schema().dedup_indices();
    if indices.is_empty() {
        for value in record.values() {
            hasher.update(value.as_bytes());
            hasher.update([UNIT_SEPARATOR]);
        }
    } else {
        for &idx in indices {
            hasher.update(record.at(idx).unwrap_or_default().as_bytes());
            hasher.update([UNIT_SEPARATOR]);
        }
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 16];
    head.copy_from_slice(&digest[..16]);
    u128::from_be_bytes(head)
}

fn is_clean(value: &str) -> bool {
    // Leading whitespace is dirty, so start as if a space was just seen.
    let mut prev_space = true;
    for c in value.chars() {
        if c.is_control() || (c.is_whitespace() && (c != ' ' || prev_space)) {
            return false;
        }
        prev_space = c == ' ';
    }
    value.is_empty() || !prev_space
}

/// Strip control characters and collapse whitespace. Returns `None` when unchanged.
pub fn sanitize_field(value: &str) -> Option<String> {
    if is_clean(value) {
        return None;
    }

    let cleaned = value
        .chars()
        .filter_map(|c| match c {
            '\t' | '\n' | '\r' => Some(' '),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect::<String>();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    (collapsed != value).then_some(collapsed)
}

/// Summary of one output file that received at least one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFile {
    pub path: PathBuf,
    pub rows: u64,
    /// CRC32 over written rows; fields split by 0x1f, rows by 0x1e
    pub crc32: String,
}

/// CSV output opened on first write.
struct OutputSink {
    path: PathBuf,
    writer: Option<AsyncWriter<File>>,
    rows: u64,
    crc: Crc32,
}

impl OutputSink {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: None,
            rows: 0,
            crc: Crc32::new(),
        }
    }

    async fn write(&mut self, schema: &Schema, record: &Record) -> StreamResult<()> {
        if self.writer.is_none() {
            if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir).await?;
            }
            let file = File::create(&self.path).await?;
            let mut writer = AsyncWriterBuilder::new().create_writer(file);
            writer.write_record(schema.headers()).await?;
            debug!(path = %self.path.display(), "opened output");
            self.writer = Some(writer);
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.write_record(record.values()).await?;
        }
        for (i, value) in record.values().iter().enumerate() {
            if i > 0 {
                self.crc.update(&[UNIT_SEPARATOR]);
            }
            self.crc.update(value.as_bytes());
        }
        self.crc.update(&[RECORD_SEPARATOR]);
        self.rows += 1;
        Ok(())
    }

    async fn close(&mut self) -> StreamResult<Option<OutputFile>> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(None);
        };
        writer.flush().await?;
        drop(writer);
        Ok(Some(OutputFile {
            path: self.path.clone(),
            rows: self.rows,
            crc32: format!("{:08x}", self.crc.clone().finalize()),
        }))
    }
}

/// Files written by a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFiles {
    pub cleaned: Option<OutputFile>,
    pub archive: Option<OutputFile>,
}

/// Owns the dedup set and output handles for exactly one input file.
///
/// Not meant to be shared: two processors writing the same output path will
/// clobber each other, there is no locking.
pub struct PostProcessor {
    options: PostProcessingOptions,
    schema: std::sync::Arc<Schema>,
    required: Vec<Option<usize>>,
    keys: DuplicateKeySet,
    stats: PostProcessingStatistics,
    cleaned: Option<OutputSink>,
    archive: Option<OutputSink>,
}

impl PostProcessor {
    pub fn new(options: PostProcessingOptions, schema: std::sync::Arc<Schema>, input: &Path) -> Self {
        let required = options
            .required_fields
            .iter()
            .map(|name| schema.index_of(name))
            .collect::<Vec<_>>();
        if options.validate_fields {
            let absent = options
                .required_fields
                .iter()
                .zip(&required)
                .filter(|(_, idx)| idx.is_none())
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>();
            if !absent.is_empty() && schema.width() > 0 {
                warn!(columns = ?absent, "required columns absent from header; every row will fail validation");
            }
        }

        let cleaned = options
            .create_separate_outputs
            .then(|| OutputSink::new(options.cleaned_path(input)));
        let archive = (options.filter_success_results && options.create_archive)
            .then(|| OutputSink::new(options.archive_path(input)));

        Self {
            options,
            schema,
            required,
            keys: DuplicateKeySet::default(),
            stats: PostProcessingStatistics::default(),
            cleaned,
            archive,
        }
    }

    pub fn options(&self) -> &PostProcessingOptions {
        &self.options
    }

    pub fn statistics(&self) -> &PostProcessingStatistics {
        &self.stats
    }

    pub fn duplicate_keys(&self) -> &DuplicateKeySet {
        &self.keys
    }

    /// Run every record of a batch through the stages, in order.
    /// Returns the retained records.
    pub async fn process_batch(&mut self, batch: Vec<Record>) -> StreamResult<Vec<Record>> {
        let mut retained = Vec::with_capacity(batch.len());
        for record in batch {
            let (disposition, record) = self.process_record(record).await?;
            if disposition == Disposition::Retained {
                retained.push(record);
            }
        }
        Ok(retained)
    }

    pub async fn process_record(&mut self, mut record: Record) -> StreamResult<(Disposition, Record)> {
        self.stats.records_examined += 1;

        if self.options.validate_fields && !self.is_valid(&record) {
            self.stats.invalid_skipped += 1;
            return Ok((Disposition::Invalid, record));
        }

        if self.options.sanitize_data {
            self.stats.sanitization_operations += 1;
            for value in record.values_mut() {
                if let Some(clean) = sanitize_field(value) {
                    *value = clean;
                    self.stats.fields_modified += 1;
                }
            }
        }

        if self.options.remove_duplicates && !self.keys.insert(content_key(&record)) {
            self.stats.duplicates_removed += 1;
            return Ok((Disposition::Duplicate, record));
        }

        if self.options.filter_success_results
            && record.result().is_some_and(|r| self.options.is_success(r))
        {
            self.stats.success_filtered += 1;
            if let Some(sink) = self.archive.as_mut() {
                sink.write(&self.schema, &record).await?;
                self.stats.records_archived += 1;
            }
            return Ok((Disposition::SuccessFiltered, record));
        }

        self.stats.records_retained += 1;
        if let Some(sink) = self.cleaned.as_mut() {
            sink.write(&self.schema, &record).await?;
        }
        Ok((Disposition::Retained, record))
    }

    fn is_valid(&self, record: &Record) -> bool {
        self.required.iter().all(|idx| {
            idx.and_then(|i| record.at(i))
                .is_some_and(|v| !v.trim().is_empty())
        })
    }

    /// Flush and close whichever outputs were opened.
    pub async fn finish(&mut self) -> StreamResult<OutputFiles> {
        let cleaned = match self.cleaned.as_mut() {
            Some(sink) => sink.close().await?,
            None => None,
        };
        let archive = match self.archive.as_mut() {
            Some(sink) => sink.close().await?,
            None => None,
        };
        Ok(OutputFiles { cleaned, archive })
    }

    /// Best-effort close after a failure; the original error is what matters.
    pub async fn abort(&mut self) {
        for sink in [self.cleaned.as_mut(), self.archive.as_mut()].into_iter().flatten() {
            if let Err(e) = sink.close().await {
                warn!(path = %sink.path.display(), error = %e, "failed to close output after error");
            }
        }
    }
}
