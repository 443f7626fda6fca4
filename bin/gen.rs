use clap::{Arg, Command};
use std::io::{self, Write};

const PROCESSES: &[(&str, u32)] = &[
    ("explorer.exe", 4120),
    ("svchost.exe", 1048),
    ("chrome.exe", 9316),
    ("MsMpEng.exe", 3380),
    ("System", 4),
];

const OPERATIONS: &[&str] = &[
    "CreateFile",
    "ReadFile",
    "RegOpenKey",
    "RegQueryValue",
    "QueryDirectory",
    "CloseFile",
];

const RESULTS: &[&str] = &[
    "SUCCESS",
    "SUCCESS",
    "SUCCESS",
    "NAME NOT FOUND",
    "ACCESS DENIED",
    "NO MORE FILES",
    "BUFFER OVERFLOW",
    "PATH NOT FOUND",
];

/// Deterministic synthetic Procmon export on stdout.
fn main() -> anyhow::Result<()> {
    let matches = Command::new("gen")
        .arg(
            Arg::new("rows")
                .long("rows")
                .value_parser(clap::value_parser!(u64))
                .required(true),
        )
        .arg(
            Arg::new("dup-every")
                .long("dup-every")
                .help("Repeat the previous row every N rows (0 = never)")
                .value_parser(clap::value_parser!(u64))
                .default_value("50"),
        )
        .arg(
            Arg::new("malformed-every")
                .long("malformed-every")
                .help("Emit a short row every N rows (0 = never)")
                .value_parser(clap::value_parser!(u64))
                .default_value("0"),
        )
        .get_matches();

    let rows: u64 = *matches.get_one("rows").unwrap();
    let dup_every: u64 = *matches.get_one("dup-every").unwrap();
    let malformed_every: u64 = *matches.get_one("malformed-every").unwrap();

    let mut out = io::BufWriter::new(io::stdout().lock());
    writeln!(
        &mut out,
        "\"Time of Day\",\"Process Name\",\"PID\",\"Operation\",\"Path\",\"Result\",\"Detail\""
    )?;

    let mut previous = String::new();
    for i in 0..rows {
        if malformed_every > 0 && i > 0 && i % malformed_every == 0 {
            writeln!(&mut out, "\"truncated row {i}\",\"x.exe\"")?;
        } else if dup_every > 0 && i > 0 && i % dup_every == 0 && !previous.is_empty() {
            writeln!(&mut out, "{previous}")?;
        } else {
            let (process, pid) = PROCESSES[(i % PROCESSES.len() as u64) as usize];
            let op = OPERATIONS[(i / 3 % OPERATIONS.len() as u64) as usize];
            let result = RESULTS[(i * 7 % RESULTS.len() as u64) as usize];
            let secs = i / 10_000_000;
            let frac = i % 10_000_000;
            previous = format!(
                "\"9:{:02}:{:02}.{frac:07} AM\",\"{process}\",\"{pid}\",\"{op}\",\"C:\\Users\\demo\\file{}.dat\",\"{result}\",\"Offset: {}, Length: 4,096\"",
                secs / 60 % 60,
                secs % 60,
                i % 997,
                i * 4096
            );
            writeln!(&mut out, "{previous}")?;
        }
        if i % 10_000 == 0 {
            out.flush()?;
        } // keep buffers moving on huge runs
    }

    out.flush()?;
    Ok(())
}
