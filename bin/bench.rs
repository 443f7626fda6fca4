use anyhow::bail;
use clap::{Arg, ArgAction, Command};
use procmon_stream::{process_file, LineAccounting, PostProcessingOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Run one export through several batch sizes and compare counters and outputs.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let matches = Command::new("bench")
        .arg(Arg::new("path").long("path").required(true).value_parser(clap::value_parser!(PathBuf)))
        .arg(
            Arg::new("batch")
                .long("batch")
                .help("Batch size to try; repeatable")
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(Arg::new("no-post-processing").long("no-post-processing").action(ArgAction::SetTrue))
        .get_matches();

    let path = matches.get_one::<PathBuf>("path").cloned().unwrap_or_default();
    let mut sizes: Vec<usize> = matches
        .get_many::<usize>("batch")
        .map(|v| v.copied().collect())
        .unwrap_or_default();
    if sizes.is_empty() {
        sizes = vec![1_000, 10_000, 50_000];
    }
    let post = !matches.get_flag("no-post-processing");

    let mut baseline: Option<(LineAccounting, Option<String>)> = None;
    for size in sizes {
        let result = process_file(&path, size, post, PostProcessingOptions::default()).await;
        if !result.success {
            bail!("batch={size} failed: {:?}", result.errors);
        }
        let crc = result.outputs.cleaned.as_ref().map(|c| c.crc32.clone());
        println!(
            "source={} batch={size} rows={} retained={} elapsed={:.1}s rows/sec={:.0} mem={:.2}MB cleaned_crc={}",
            path.display(),
            result.statistics.lines_read,
            result.accounting.retained,
            result.performance.duration_seconds,
            result.performance.records_per_second,
            result.performance.memory_used_mb,
            crc.as_deref().unwrap_or("-"),
        );

        match &baseline {
            None => baseline = Some((result.accounting, crc)),
            Some((accounting, first_crc)) => {
                if *accounting != result.accounting || *first_crc != crc {
                    bail!("batch={size} diverged from the first run: {:?} vs {:?}", result.accounting, accounting);
                }
            }
        }
    }
    Ok(())
}
