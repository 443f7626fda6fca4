use anyhow::{anyhow, Result};
use memchr::{memchr, memchr_iter};
use memmap2::MmapOptions;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

/// Estimate the number of data rows in a local, uncompressed export.
///
/// Counts line breaks after the header with mmap and one scan per core.
/// Assumptions: no embedded newlines in quoted fields, so the count is an
/// upper bound for exports that have them. Only used to size progress bars.
pub fn fast_local_count(path: &Path) -> Result<u64> {
    if matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("gz") | Some("zst")
    ) {
        return Err(anyhow!("fast path needs an uncompressed file: {}", path.display()));
    }

    let file = File::open(path)?;
    let len = file.metadata()?.len() as usize;
    if len == 0 {
        return Ok(0);
    }
    // SAFETY: read-only map; the file is not expected to change underneath us.
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    let data: &[u8] = &mmap[..];

    let Some(header_end) = memchr(b'\n', data) else {
        // Header only, without a trailing newline.
        return Ok(0);
    };
    let body_start = header_end + 1;
    if body_start >= len {
        return Ok(0);
    }

    // Split the body on line boundaries, one chunk per core.
    let cores = num_cpus::get().max(1);
    let approx = (len - body_start) / cores + 1;
    let mut starts = vec![body_start];
    let mut pos = body_start + approx;
    while starts.len() < cores && pos < len {
        let next = memchr(b'\n', &data[pos..])
            .map(|off| pos + off + 1)
            .unwrap_or(len);
        if next >= len {
            break;
        }
        starts.push(next);
        pos = next + approx;
    }
    starts.push(len);

    let total = AtomicU64::new(0);
    thread::scope(|s| {
        let total_ref = &total;
        for w in starts.windows(2) {
            let slice = &data[w[0]..w[1]];
            s.spawn(move || {
                let mut count = 0u64;
                let mut line_start = 0usize;
                for nl in memchr_iter(b'\n', slice) {
                    // Blank lines are skipped by the CSV reader too.
                    if !is_blank(&slice[line_start..nl]) {
                        count += 1;
                    }
                    line_start = nl + 1;
                }
                total_ref.fetch_add(count, Ordering::Relaxed);
            });
        }
    });

    let mut rows = total.load(Ordering::Relaxed);
    // Last line without a trailing newline.
    let tail_start = data[body_start..]
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|p| body_start + p + 1)
        .unwrap_or(body_start);
    if !is_blank(&data[tail_start..]) {
        rows += 1;
    }
    Ok(rows)
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| *b == b'\r')
}
