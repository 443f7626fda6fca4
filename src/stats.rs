//! Final summaries built from the running counts.
//!
//! Every rate is a percentage rounded to two decimals and clamped to
//! `[0, 100]`; a zero denominator gives `0.0`.

use crate::batch::{RunningStatistics, TrackedError};
use crate::postprocess::{OutputFiles, PostProcessingOptions, PostProcessingStatistics};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Procmon statuses that are informational rather than failures.
const WARNING_RESULTS: &[&str] = &[
    "BUFFER OVERFLOW",
    "NO MORE FILES",
    "NO MORE ENTRIES",
    "REPARSE",
    "END OF FILE",
    "BUFFER TOO SMALL",
    "NOT REPARSE POINT",
    "FAST IO DISALLOWED",
    "OPLOCK NOT GRANTED",
];

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCategory {
    Success,
    Warning,
    Error,
}

pub fn categorize(result: &str, options: &PostProcessingOptions) -> ResultCategory {
    let result = result.trim();
    if options.is_success(result) {
        ResultCategory::Success
    } else if WARNING_RESULTS.iter().any(|w| w.eq_ignore_ascii_case(result)) {
        ResultCategory::Warning
    } else {
        ResultCategory::Error
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountEntry {
    pub name: String,
    pub count: u64,
}

/// Top `n` by count, ties broken by name so output is stable.
pub fn top_n(counts: &HashMap<String, u64>, n: usize) -> Vec<CountEntry> {
    let mut entries = counts
        .iter()
        .map(|(name, count)| CountEntry {
            name: name.clone(),
            count: *count,
        })
        .collect::<Vec<_>>();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    entries.truncate(n);
    entries
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CategoryCount {
    pub count: u64,
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CategoryBreakdown {
    pub success: CategoryCount,
    pub warning: CategoryCount,
    pub error: CategoryCount,
}

impl CategoryBreakdown {
    pub fn from_results(by_result: &HashMap<String, u64>, options: &PostProcessingOptions) -> Self {
        let (mut success, mut warning, mut error) = (0u64, 0u64, 0u64);
        for (result, count) in by_result {
            match categorize(result, options) {
                ResultCategory::Success => success += count,
                ResultCategory::Warning => warning += count,
                ResultCategory::Error => error += count,
            }
        }
        let total = success + warning + error;
        let entry = |count| CategoryCount {
            count,
            rate: percent(count, total),
        };
        Self {
            success: entry(success),
            warning: entry(warning),
            error: entry(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSummary {
    pub lines_read: u64,
    pub total_records: u64,
    pub retained_records: u64,
    pub malformed_skipped: u64,
    pub caller_filtered: u64,
    pub batches: u64,
    pub unique_processes: usize,
    pub unique_operations: usize,
    pub top_processes: Vec<CountEntry>,
    pub top_operations: Vec<CountEntry>,
    pub top_results: Vec<CountEntry>,
    pub result_categories: CategoryBreakdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub duration_seconds: f64,
    pub records_per_second: f64,
    #[serde(rename = "memoryUsedMB")]
    pub memory_used_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessingSummary {
    #[serde(flatten)]
    pub counters: PostProcessingStatistics,
    pub retention_rate: f64,
    pub success_filter_rate: f64,
    pub duplicate_rate: f64,
    pub invalid_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQuality {
    /// Share of examined records that passed validation
    pub validity_rate: f64,
    /// Share of valid records that were not duplicates
    pub uniqueness_rate: f64,
    /// Share of examined records removed as success or duplicate
    pub noise_reduction_rate: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessingReport {
    pub statistics: PostProcessingSummary,
    pub data_quality: DataQuality,
}

impl PostProcessingReport {
    pub fn new(stats: &PostProcessingStatistics) -> Self {
        let examined = stats.records_examined;
        let valid = examined.saturating_sub(stats.invalid_skipped);

        let validity_rate = percent(valid, examined);
        let uniqueness_rate = percent(valid.saturating_sub(stats.duplicates_removed), valid);
        let data_quality = DataQuality {
            validity_rate,
            uniqueness_rate,
            noise_reduction_rate: percent(stats.success_filtered + stats.duplicates_removed, examined),
            score: round2((validity_rate + uniqueness_rate) / 2.0).clamp(0.0, 100.0),
        };

        Self {
            statistics: PostProcessingSummary {
                counters: stats.clone(),
                retention_rate: percent(stats.records_retained, examined),
                success_filter_rate: percent(stats.success_filtered, examined),
                duplicate_rate: percent(stats.duplicates_removed, examined),
                invalid_rate: percent(stats.invalid_skipped, examined),
            },
            data_quality,
        }
    }
}

impl StatisticsSummary {
    pub fn new(running: &RunningStatistics, options: &PostProcessingOptions, n: usize) -> Self {
        Self {
            lines_read: running.lines_read,
            total_records: running.total_records,
            retained_records: running.retained,
            malformed_skipped: running.malformed_skipped,
            caller_filtered: running.caller_filtered,
            batches: running.batches,
            unique_processes: running.by_process.len(),
            unique_operations: running.by_operation.len(),
            top_processes: top_n(&running.by_process, n),
            top_operations: top_n(&running.by_operation, n),
            top_results: top_n(&running.by_result, n),
            result_categories: CategoryBreakdown::from_results(&running.by_result, options),
        }
    }
}

impl PerformanceSummary {
    pub fn new(running: &RunningStatistics) -> Self {
        let secs = running.elapsed.as_secs_f64();
        let records_per_second = if secs > 0.0 {
            round2(running.lines_read as f64 / secs)
        } else {
            0.0
        };
        Self {
            duration_seconds: (secs * 1000.0).round() / 1000.0,
            records_per_second,
            memory_used_mb: round2(running.peak_memory_bytes as f64 / BYTES_PER_MB),
        }
    }
}

/// How every data line of the input was accounted for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineAccounting {
    pub retained: u64,
    pub success_filtered: u64,
    pub duplicates_removed: u64,
    pub invalid_skipped: u64,
    pub malformed_skipped: u64,
    pub caller_filtered: u64,
}

impl LineAccounting {
    pub fn total(&self) -> u64 {
        self.retained
            + self.success_filtered
            + self.duplicates_removed
            + self.invalid_skipped
            + self.malformed_skipped
            + self.caller_filtered
    }
}

/// Outcome of processing one file. Always produced, even on failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub success: bool,
    pub file: PathBuf,
    pub record_count: u64,
    pub statistics: StatisticsSummary,
    pub performance: PerformanceSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_processing: Option<PostProcessingReport>,
    pub accounting: LineAccounting,
    pub outputs: OutputFiles,
    pub errors: Vec<TrackedError>,
    /// Per-line errors dropped once the tracked list was full
    pub errors_untracked: u64,
    pub cancelled: bool,
}

impl ProcessingResult {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        success: bool,
        file: PathBuf,
        running: &RunningStatistics,
        post: Option<&PostProcessingStatistics>,
        options: &PostProcessingOptions,
        top: usize,
        outputs: OutputFiles,
        errors: (Vec<TrackedError>, u64),
        cancelled: bool,
    ) -> Self {
        let accounting = LineAccounting {
            retained: running.retained,
            success_filtered: post.map_or(0, |p| p.success_filtered),
            duplicates_removed: post.map_or(0, |p| p.duplicates_removed),
            invalid_skipped: post.map_or(0, |p| p.invalid_skipped),
            malformed_skipped: running.malformed_skipped,
            caller_filtered: running.caller_filtered,
        };
        Self {
            success,
            file,
            record_count: running.total_records,
            statistics: StatisticsSummary::new(running, options, top),
            performance: PerformanceSummary::new(running),
            post_processing: post.map(PostProcessingReport::new),
            accounting,
            outputs,
            errors: errors.0,
            errors_untracked: errors.1,
            cancelled,
        }
    }
}
