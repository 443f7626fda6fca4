use procmon_stream::{
    process_file, MalformedPolicy, PostProcessingOptions, ProcessorConfig, StreamProcessor,
    TrackedErrorKind,
};
use std::path::{Path, PathBuf};

const HEADER: &str = "Time of Day,Process Name,PID,Operation,Path,Result,Detail";

fn write_export(dir: &Path, name: &str, rows: &[&str]) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    let mut text = String::from(HEADER);
    text.push('\n');
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    std::fs::write(&path, text)?;
    Ok(path)
}

/// Ten rows: 1, 3 and 5 succeed; 2 repeats 1 and 9 repeats 3.
const SCENARIO: [&str; 10] = [
    "10:00:01,a.exe,100,ReadFile,C:\\one.txt,SUCCESS,",
    "10:00:01,a.exe,100,ReadFile,C:\\one.txt,SUCCESS,",
    "10:00:03,b.exe,200,WriteFile,C:\\three.txt,SUCCESS,",
    "10:00:04,c.exe,300,RegOpenKey,HKLM\\Software\\Four,NAME NOT FOUND,",
    "10:00:05,d.exe,400,ReadFile,C:\\five.txt,SUCCESS,",
    "10:00:06,e.exe,500,CreateFile,C:\\six.txt,ACCESS DENIED,",
    "10:00:07,f.exe,600,CreateFile,C:\\seven.txt,PATH NOT FOUND,",
    "10:00:08,g.exe,700,QueryDirectory,C:\\eight,NO MORE FILES,",
    "10:00:03,b.exe,200,WriteFile,C:\\three.txt,SUCCESS,",
    "10:00:10,h.exe,800,ReadFile,C:\\ten.txt,BUFFER OVERFLOW,",
];

#[tokio::test]
async fn ten_row_scenario_dedups_before_success_filter() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_export(dir.path(), "scenario.csv", &SCENARIO)?;

    let result = process_file(&path, 1_000, true, PostProcessingOptions::default()).await;
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.record_count, 10);

    let acc = result.accounting;
    assert_eq!(acc.success_filtered, 3);
    assert_eq!(acc.duplicates_removed, 2);
    assert_eq!(acc.retained, 5);
    assert_eq!(acc.invalid_skipped, 0);
    assert_eq!(acc.malformed_skipped, 0);
    assert_eq!(acc.total(), 10);

    let pp = result.post_processing.as_ref().expect("post-processing report");
    assert_eq!(pp.statistics.retention_rate, 50.0);
    assert_eq!(pp.statistics.success_filter_rate, 30.0);
    assert_eq!(pp.statistics.duplicate_rate, 20.0);

    let archive = result.outputs.archive.as_ref().expect("archive written");
    assert_eq!(archive.path, dir.path().join("Archive").join("scenario-archive.csv"));
    let archived = std::fs::read_to_string(&archive.path)?;
    let archived_times = archived
        .lines()
        .skip(1)
        .map(|l| l.split(',').next().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    assert_eq!(archived_times, vec!["10:00:01", "10:00:03", "10:00:05"]);

    let cleaned = result.outputs.cleaned.as_ref().expect("cleaned written");
    assert_eq!(cleaned.path, dir.path().join("scenario-cleaned.csv"));
    let kept = std::fs::read_to_string(&cleaned.path)?;
    assert_eq!(kept.lines().next(), Some(HEADER));
    assert_eq!(kept.lines().count(), 6);
    assert!(!kept.contains("SUCCESS"));
    Ok(())
}

const MIXED: [&str; 10] = [
    "10:00:01,a.exe,1,ReadFile,C:\\a,SUCCESS,",
    "10:00:02,a.exe,1,ReadFile,C:\\b,NAME NOT FOUND,",
    "10:00:02,a.exe,1,ReadFile,C:\\b,NAME NOT FOUND,",
    "10:00:02,  a.exe ,1,ReadFile,C:\\b,NAME NOT FOUND,",
    "10:00:03,,1,ReadFile,C:\\c,ACCESS DENIED,",
    "10:00:04,b.exe,2,ReadFile,C:\\d,success,",
    "10:00:05,b.exe,2",
    "10:00:06,b.exe,2,ReadFile,C:\\e,SUCCESS,,extra",
    "10:00:07,c.exe,3,CreateFile,\"C:\\f, with comma\",NAME NOT FOUND,\"Desired Access: Read, Write\"",
    "10:00:08,c.exe,3,CreateFile,C:\\g,Success,",
];

#[tokio::test]
async fn every_line_is_accounted_for_under_all_option_combinations() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_export(dir.path(), "mixed.csv", &MIXED)?;

    for mask in 0u8..16 {
        let options = PostProcessingOptions {
            filter_success_results: mask & 1 != 0,
            remove_duplicates: mask & 2 != 0,
            sanitize_data: mask & 4 != 0,
            validate_fields: mask & 8 != 0,
            create_archive: false,
            create_separate_outputs: false,
            ..Default::default()
        };
        let result = process_file(&path, 3, true, options).await;
        assert!(result.success, "mask {mask}: {:?}", result.errors);
        assert_eq!(result.statistics.lines_read, 10, "mask {mask}");
        assert_eq!(result.accounting.malformed_skipped, 2, "mask {mask}");
        assert_eq!(result.accounting.total(), 10, "mask {mask}: {:?}", result.accounting);
    }

    let disabled = process_file(&path, 3, false, PostProcessingOptions::default()).await;
    assert!(disabled.success);
    assert!(disabled.post_processing.is_none());
    assert_eq!(disabled.accounting.retained, 8);
    assert_eq!(disabled.accounting.total(), 10);
    Ok(())
}

#[tokio::test]
async fn sanitizing_exposes_whitespace_duplicates() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_export(dir.path(), "mixed.csv", &MIXED)?;

    let base = PostProcessingOptions {
        create_archive: false,
        create_separate_outputs: false,
        ..Default::default()
    };
    let sanitized = process_file(&path, 100, true, base.clone()).await;
    assert_eq!(sanitized.accounting.duplicates_removed, 2);
    assert_eq!(sanitized.accounting.invalid_skipped, 1);

    let raw = process_file(
        &path,
        100,
        true,
        PostProcessingOptions {
            sanitize_data: false,
            ..base
        },
    )
    .await;
    assert_eq!(raw.accounting.duplicates_removed, 1);
    Ok(())
}

#[tokio::test]
async fn success_filter_matches_indicators_case_insensitively() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_export(dir.path(), "mixed.csv", &MIXED)?;

    let result = process_file(
        &path,
        4,
        true,
        PostProcessingOptions {
            remove_duplicates: false,
            validate_fields: false,
            create_archive: false,
            create_separate_outputs: false,
            ..Default::default()
        },
    )
    .await;
    // SUCCESS, success, Success; the long row is malformed and never examined.
    assert_eq!(result.accounting.success_filtered, 3);
    assert!(result
        .statistics
        .top_results
        .iter()
        .all(|e| !e.name.eq_ignore_ascii_case("success")));

    let custom = process_file(
        &path,
        4,
        true,
        PostProcessingOptions {
            remove_duplicates: false,
            validate_fields: false,
            create_archive: false,
            create_separate_outputs: false,
            success_indicators: vec!["name not found".into()],
            ..Default::default()
        },
    )
    .await;
    assert_eq!(custom.accounting.success_filtered, 4);
    Ok(())
}

#[tokio::test]
async fn dedup_is_idempotent_on_clean_output() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_export(dir.path(), "scenario.csv", &SCENARIO)?;

    let first = process_file(&path, 2, true, PostProcessingOptions::default()).await;
    let cleaned = first.outputs.cleaned.expect("cleaned output").path;

    let keep_everything = PostProcessingOptions {
        filter_success_results: false,
        create_separate_outputs: false,
        ..Default::default()
    };
    for _ in 0..2 {
        let again = process_file(&cleaned, 2, true, keep_everything.clone()).await;
        assert!(again.success);
        assert_eq!(again.accounting.duplicates_removed, 0);
        assert_eq!(again.accounting.retained, 5);
    }
    Ok(())
}

#[tokio::test]
async fn header_only_file_reports_zero_not_nan() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_export(dir.path(), "empty.csv", &[])?;

    let result = process_file(&path, 1_000, true, PostProcessingOptions::default()).await;
    assert!(result.success);
    assert_eq!(result.record_count, 0);
    let pp = result.post_processing.expect("report");
    assert_eq!(pp.statistics.retention_rate, 0.0);
    assert_eq!(pp.data_quality.score, 0.0);
    assert_eq!(result.performance.memory_used_mb, 0.0);
    assert!(result.outputs.cleaned.is_none());
    assert!(!dir.path().join("empty-cleaned.csv").exists());

    let zero_bytes = dir.path().join("zero.csv");
    std::fs::write(&zero_bytes, "")?;
    let result = process_file(&zero_bytes, 1_000, true, PostProcessingOptions::default()).await;
    assert!(result.success);
    assert_eq!(result.record_count, 0);
    Ok(())
}

#[tokio::test]
async fn missing_or_empty_path_is_a_failed_result() {
    let result = process_file("does-not-exist.csv", 1_000, true, PostProcessingOptions::default()).await;
    assert!(!result.success);
    assert_eq!(result.record_count, 0);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, TrackedErrorKind::EmptyOrInvalidPath);

    let result = process_file("", 1_000, true, PostProcessingOptions::default()).await;
    assert!(!result.success);
    assert_eq!(result.errors[0].kind, TrackedErrorKind::EmptyOrInvalidPath);
}

#[tokio::test]
async fn outputs_resolving_to_the_input_are_rejected_before_writing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let rows = (0..200)
        .map(|i| format!("10:00:{:02}.{i:03},app.exe,100,ReadFile,C:\\f{i}.txt,NAME NOT FOUND,", i % 60))
        .collect::<Vec<_>>();
    let path = write_export(dir.path(), "t.csv", &rows.iter().map(String::as_str).collect::<Vec<_>>())?;
    let before = std::fs::read(&path)?;

    let options = PostProcessingOptions {
        cleaned_output_suffix: String::new(),
        ..Default::default()
    };
    let result = process_file(&path, 10, true, options).await;
    assert!(!result.success);
    assert_eq!(result.errors[0].kind, TrackedErrorKind::InvalidConfiguration);
    assert!(result.errors[0].message.contains("overwrite the input"));
    assert_eq!(result.outputs.cleaned, None);
    assert_eq!(std::fs::read(&path)?, before);

    // Same check through a relative spelling of the input's directory.
    let dotted = dir.path().join(".").join("t.csv");
    let options = PostProcessingOptions {
        cleaned_output_suffix: String::new(),
        ..Default::default()
    };
    let result = process_file(&dotted, 10, true, options).await;
    assert!(!result.success);
    assert_eq!(std::fs::read(&path)?, before);
    Ok(())
}

#[tokio::test]
async fn cleaned_and_archive_on_the_same_file_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_export(dir.path(), "scenario.csv", &SCENARIO)?;

    let options = PostProcessingOptions {
        cleaned_output_suffix: "-archive".into(),
        archive_directory: String::new(),
        ..Default::default()
    };
    let result = process_file(&path, 1_000, true, options.clone()).await;
    assert!(!result.success);
    assert_eq!(result.errors[0].kind, TrackedErrorKind::InvalidConfiguration);
    assert!(!dir.path().join("scenario-archive.csv").exists());

    // Without an archive the same suffix is harmless.
    let result = process_file(
        &path,
        1_000,
        true,
        PostProcessingOptions {
            create_archive: false,
            ..options
        },
    )
    .await;
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(
        result.outputs.cleaned.map(|c| c.path),
        Some(dir.path().join("scenario-archive.csv"))
    );
    Ok(())
}

#[tokio::test]
async fn output_write_failure_is_an_io_failure_with_outputs_closed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_export(
        dir.path(),
        "blocked.csv",
        &[
            "10:00:01,a.exe,100,ReadFile,C:\\one.txt,NAME NOT FOUND,",
            "10:00:02,a.exe,100,ReadFile,C:\\two.txt,SUCCESS,",
            "10:00:03,a.exe,100,ReadFile,C:\\three.txt,ACCESS DENIED,",
        ],
    )?;
    // A regular file where the archive directory should go.
    std::fs::write(dir.path().join("Archive"), "not a directory")?;

    let result = process_file(&path, 1_000, true, PostProcessingOptions::default()).await;
    assert!(!result.success);
    assert!(!result.cancelled);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, TrackedErrorKind::IoFailure);

    // The cleaned output was started before the failure and is flushed on abort.
    let cleaned = std::fs::read_to_string(dir.path().join("blocked-cleaned.csv"))?;
    let lines = cleaned.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], HEADER);
    assert!(lines[1].starts_with("10:00:01,a.exe"));
    Ok(())
}

#[tokio::test]
async fn counters_do_not_depend_on_batch_size() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let rows = (0..5_000)
        .map(|i| {
            let j = if i % 7 == 0 { i / 2 } else { i };
            let result = match j % 4 {
                0 => "SUCCESS",
                1 => "NAME NOT FOUND",
                2 => "NO MORE FILES",
                _ => "ACCESS DENIED",
            };
            format!("10:{:02}:{:02}.{j:07},p{}.exe,{},ReadFile,C:\\f{j},{result},", j / 3600 % 60, j / 60 % 60, j % 9, j % 9)
        })
        .collect::<Vec<_>>();
    let refs = rows.iter().map(String::as_str).collect::<Vec<_>>();
    let path = write_export(dir.path(), "big.csv", &refs)?;

    let mut seen = Vec::new();
    for batch in [1_000, 50_000, 7] {
        let result = process_file(&path, batch, true, PostProcessingOptions::default()).await;
        assert!(result.success);
        seen.push((
            result.accounting,
            result.outputs.cleaned.map(|c| c.crc32),
            result.outputs.archive.map(|a| a.crc32),
            result.statistics.top_processes,
        ));
    }
    assert!(seen[0].0.duplicates_removed > 0);
    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[0], seen[2]);
    Ok(())
}

#[tokio::test]
async fn malformed_policy_pad_recovers_short_rows() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_export(
        dir.path(),
        "short.csv",
        &[
            "10:00:01,a.exe,1,ReadFile,C:\\a,NAME NOT FOUND",
            "10:00:02,a.exe,1,ReadFile,C:\\b,NAME NOT FOUND,,",
            "10:00:03,a.exe",
        ],
    )?;

    let skip = process_file(&path, 10, true, PostProcessingOptions::default()).await;
    assert_eq!(skip.accounting.malformed_skipped, 3);
    assert_eq!(skip.errors.len(), 3);
    assert_eq!(skip.errors[0].kind, TrackedErrorKind::MalformedLine);
    assert_eq!(skip.errors[0].line, Some(2));

    let config = ProcessorConfig {
        batch_size: Some(10),
        malformed_policy: MalformedPolicy::Pad,
        ..Default::default()
    };
    let pad = StreamProcessor::new(config).process_file(&path).await;
    assert_eq!(pad.accounting.malformed_skipped, 0);
    assert_eq!(pad.accounting.retained, 2);
    // Padded third row has no Path/Result and fails validation.
    assert_eq!(pad.accounting.invalid_skipped, 1);
    assert_eq!(pad.accounting.total(), 3);
    Ok(())
}

#[tokio::test]
async fn tracked_errors_are_capped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let rows = vec!["bad,row"; 25];
    let path = write_export(dir.path(), "bad.csv", &rows)?;

    let config = ProcessorConfig {
        max_tracked_errors: 10,
        ..Default::default()
    };
    let result = StreamProcessor::new(config).process_file(&path).await;
    assert!(result.success);
    assert_eq!(result.accounting.malformed_skipped, 25);
    assert_eq!(result.errors.len(), 10);
    assert_eq!(result.errors_untracked, 15);
    Ok(())
}

#[tokio::test]
async fn reads_gzip_exports() -> anyhow::Result<()> {
    use async_compression::tokio::write::GzipEncoder;
    use tokio::io::AsyncWriteExt;

    let dir = tempfile::tempdir()?;
    let mut text = format!("{HEADER}\n");
    for row in SCENARIO {
        text.push_str(row);
        text.push('\n');
    }
    let gz_path = dir.path().join("scenario.csv.gz");
    let mut encoder = GzipEncoder::new(tokio::fs::File::create(&gz_path).await?);
    encoder.write_all(text.as_bytes()).await?;
    encoder.shutdown().await?;

    let result = process_file(&gz_path, 4, true, PostProcessingOptions::default()).await;
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.accounting.success_filtered, 3);
    assert_eq!(result.accounting.duplicates_removed, 2);
    assert_eq!(
        result.outputs.cleaned.map(|c| c.path),
        Some(dir.path().join("scenario-cleaned.csv"))
    );
    Ok(())
}

#[tokio::test]
async fn result_json_matches_report_contract() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_export(dir.path(), "scenario.csv", &SCENARIO)?;
    let result = process_file(&path, 1_000, true, PostProcessingOptions::default()).await;

    let json = serde_json::to_value(&result)?;
    assert_eq!(json["success"], true);
    assert_eq!(json["recordCount"], 10);
    assert_eq!(json["statistics"]["topProcesses"][0]["count"], 1);
    assert_eq!(json["statistics"]["resultCategories"]["warning"]["count"], 2);
    assert_eq!(json["postProcessing"]["statistics"]["duplicatesRemoved"], 2);
    assert!(json["performance"]["durationSeconds"].is_number());
    assert!(json["errors"].as_array().is_some_and(|e| e.is_empty()));
    Ok(())
}
