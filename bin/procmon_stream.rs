use anyhow::{bail, Context};
use clap::{Arg, ArgAction, Command};
use indicatif::{ProgressBar, ProgressStyle};
use procmon_stream::{
    load_config, BatchProfile, CancellationToken, MalformedPolicy, ProcessorConfig,
    StreamProcessor,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let matches = Command::new("procmon-stream")
        .about("Stream Process Monitor CSV exports into cleaned, deduplicated outputs")
        .arg(Arg::new("files").required(true).num_args(1..).value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("config").long("config").help("TOML processor config").value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("profile").long("profile").help("Batch size profile: small, standard, large"))
        .arg(Arg::new("batch-size").long("batch-size").value_parser(clap::value_parser!(usize)))
        .arg(Arg::new("charset").long("charset").help("Input encoding label, e.g. windows-1252 or utf-16le"))
        .arg(Arg::new("malformed").long("malformed").help("Rows with the wrong field count: skip or pad").value_parser(["skip", "pad"]))
        .arg(Arg::new("no-post-processing").long("no-post-processing").action(ArgAction::SetTrue))
        .arg(Arg::new("keep-success").long("keep-success").help("Do not filter SUCCESS rows").action(ArgAction::SetTrue))
        .arg(Arg::new("keep-duplicates").long("keep-duplicates").action(ArgAction::SetTrue))
        .arg(Arg::new("no-archive").long("no-archive").action(ArgAction::SetTrue))
        .arg(Arg::new("progress").long("progress").help("Show a progress bar on stderr").action(ArgAction::SetTrue))
        .arg(Arg::new("compact").long("compact").help("Print one JSON result per line").action(ArgAction::SetTrue))
        .get_matches();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => load_config(path)?,
        None => ProcessorConfig::default(),
    };
    if let Some(name) = matches.get_one::<String>("profile") {
        config.profile = BatchProfile::parse(name)
            .with_context(|| format!("unknown profile '{name}'"))?;
        config.batch_size = None;
    }
    if let Some(size) = matches.get_one::<usize>("batch-size") {
        config.batch_size = Some(*size);
    }
    if let Some(policy) = matches.get_one::<String>("malformed") {
        config.malformed_policy = if policy == "pad" {
            MalformedPolicy::Pad
        } else {
            MalformedPolicy::Skip
        };
    }
    if matches.get_flag("no-post-processing") {
        config.enable_post_processing = false;
    }
    if matches.get_flag("keep-success") {
        config.post_processing.filter_success_results = false;
    }
    if matches.get_flag("keep-duplicates") {
        config.post_processing.remove_duplicates = false;
    }
    if matches.get_flag("no-archive") {
        config.post_processing.create_archive = false;
    }
    config.validate()?;

    let charset = match matches.get_one::<String>("charset") {
        Some(label) => encoding_rs::Encoding::for_label(label.as_bytes())
            .with_context(|| format!("unknown charset '{label}'"))?,
        None => encoding_rs::UTF_8,
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; stopping after the current batch");
                cancel.cancel();
            }
        });
    }

    let show_progress = matches.get_flag("progress");
    let compact = matches.get_flag("compact");
    let mut failed = 0usize;

    for path in matches.get_many::<PathBuf>("files").into_iter().flatten() {
        let mut processor = StreamProcessor::new(config.clone())
            .with_charset(charset)
            .with_cancellation(cancel.clone());

        let pb = show_progress.then(|| {
            let total = estimate_rows(path);
            let pb = match total {
                Some(n) => ProgressBar::new(n).with_style(
                    ProgressStyle::with_template("{spinner} {msg} [{bar:40}] {pos}/{len} rows ({per_sec})")
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                ),
                None => ProgressBar::new_spinner(),
            };
            pb.set_message(path.display().to_string());
            (pb, total)
        });
        if let Some((pb, total)) = &pb {
            let tick = pb.clone();
            processor = processor
                .with_estimated_total(*total)
                .with_progress(move |p| tick.set_position(p.records_processed));
        }

        let result = processor.process_file(path).await;
        if let Some((pb, _)) = pb {
            pb.finish_and_clear();
        }
        failed += usize::from(!result.success);
        print_result(&result, compact)?;

        if cancel.is_cancelled() {
            break;
        }
    }

    if failed > 0 {
        bail!("{failed} file(s) failed");
    }
    Ok(())
}

fn print_result(result: &procmon_stream::ProcessingResult, compact: bool) -> anyhow::Result<()> {
    let json = if compact {
        serde_json::to_string(result)?
    } else {
        serde_json::to_string_pretty(result)?
    };
    println!("{json}");
    Ok(())
}

#[cfg(feature = "fast_local")]
fn estimate_rows(path: &std::path::Path) -> Option<u64> {
    procmon_stream::fast_local_count(path).ok()
}

#[cfg(not(feature = "fast_local"))]
fn estimate_rows(_path: &std::path::Path) -> Option<u64> {
    None
}
