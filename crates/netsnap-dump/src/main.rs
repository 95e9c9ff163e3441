use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;

use netsnap_core::emit::{LABEL_NAME, Labels};
use netsnap_core::sink::{BLOCK_EXTENSION, BlockMetadata, BlockReader, list_blocks, read_block_metadata};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "netsnap-dump", about = "Inspect netsnap block files")]
struct Cli {
    /// Path to a block file or a block directory
    path: Option<PathBuf>,

    /// List every series of a block with its samples
    #[arg(long)]
    series: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    let path = cli.path.clone().unwrap_or_else(|| PathBuf::from("."));

    if path.is_dir() {
        dump_directory(&path, &cli);
    } else if has_ext(&path, BLOCK_EXTENSION) {
        dump_block(&path, &cli);
    } else {
        eprintln!("Unknown file type: {}", path.display());
        std::process::exit(1);
    }
}

fn has_ext(path: &Path, ext: &str) -> bool {
    path.extension().and_then(OsStr::to_str) == Some(ext)
}

// ── Formatting helpers ───────────────────────────────────────────────────────

fn human_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= MIB {
        format!("{:.1} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}

fn fmt_ts_us(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp_micros(ts)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn fmt_labels(labels: &Labels) -> String {
    let name = labels.get(LABEL_NAME).map(String::as_str).unwrap_or("?");
    let rest: Vec<String> = labels
        .iter()
        .filter(|(k, _)| k.as_str() != LABEL_NAME)
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect();
    format!("{name}{{{}}}", rest.join(", "))
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => {
            eprintln!("Error encoding JSON: {e}");
            std::process::exit(1);
        }
    }
}

// ── JSON shapes ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct BlockJson {
    path: String,
    size: u64,
    #[serde(flatten)]
    metadata: BlockMetadata,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    metrics: Vec<MetricJson>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    series: Vec<SeriesJson>,
}

#[derive(Serialize)]
struct MetricJson {
    name: String,
    series: usize,
    samples: usize,
}

#[derive(Serialize)]
struct SeriesJson {
    labels: Labels,
    samples: Vec<(i64, f64)>,
}

#[derive(Serialize)]
struct DirectoryJson {
    path: String,
    blocks: Vec<BlockJson>,
    total_size: u64,
    total_samples: u64,
    first_timestamp_us: Option<i64>,
    last_timestamp_us: Option<i64>,
}

// ── Block ────────────────────────────────────────────────────────────────────

fn metric_breakdown(reader: &BlockReader) -> Vec<MetricJson> {
    let mut by_name: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for s in reader.series() {
        let name = s.labels.get(LABEL_NAME).map(String::as_str).unwrap_or("?");
        let entry = by_name.entry(name).or_default();
        entry.0 += 1;
        entry.1 += s.samples.len();
    }
    by_name
        .into_iter()
        .map(|(name, (series, samples))| MetricJson {
            name: name.to_string(),
            series,
            samples,
        })
        .collect()
}

fn dump_block(path: &Path, cli: &Cli) {
    let reader = BlockReader::open(path).unwrap_or_else(|e| {
        eprintln!("Error reading block {}: {e}", path.display());
        std::process::exit(1);
    });
    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let meta = *reader.metadata();
    let metrics = metric_breakdown(&reader);
    let all_series = reader.into_series();

    if cli.json {
        let series = if cli.series {
            all_series
                .into_iter()
                .map(|s| SeriesJson {
                    labels: s.labels,
                    samples: s.samples,
                })
                .collect()
        } else {
            Vec::new()
        };
        print_json(&BlockJson {
            path: path.display().to_string(),
            size,
            metadata: meta,
            metrics,
            series,
        });
        return;
    }

    println!("Block: {} ({})", path.display(), human_bytes(size));
    println!(
        "  Range:   {} .. {}",
        fmt_ts_us(meta.min_timestamp_us),
        fmt_ts_us(meta.max_timestamp_us)
    );
    println!("  Series:  {}", meta.series_count);
    println!("  Samples: {}", meta.sample_count);
    println!();
    println!("  {:<48} {:>8} {:>8}", "Metric", "Series", "Samples");
    for m in &metrics {
        println!("  {:<48} {:>8} {:>8}", m.name, m.series, m.samples);
    }

    if cli.series {
        println!();
        for s in &all_series {
            println!("  {}", fmt_labels(&s.labels));
            for (ts, value) in &s.samples {
                println!("    {}  {}", fmt_ts_us(*ts), value);
            }
        }
    }
}

// ── Directory ────────────────────────────────────────────────────────────────

fn dump_directory(path: &Path, cli: &Cli) {
    let blocks = list_blocks(path).unwrap_or_else(|e| {
        eprintln!("Error reading directory {}: {e}", path.display());
        std::process::exit(1);
    });

    let mut rows: Vec<BlockJson> = Vec::new();
    for block in &blocks {
        match read_block_metadata(block) {
            Ok(metadata) => rows.push(BlockJson {
                path: block.display().to_string(),
                size: fs::metadata(block).map(|m| m.len()).unwrap_or(0),
                metadata,
                metrics: Vec::new(),
                series: Vec::new(),
            }),
            Err(e) => eprintln!("Skipping {}: {e}", block.display()),
        }
    }

    let total_size: u64 = rows.iter().map(|r| r.size).sum();
    let total_samples: u64 = rows.iter().map(|r| r.metadata.sample_count).sum();
    let first = rows.iter().map(|r| r.metadata.min_timestamp_us).min();
    let last = rows.iter().map(|r| r.metadata.max_timestamp_us).max();

    if cli.json {
        print_json(&DirectoryJson {
            path: path.display().to_string(),
            blocks: rows,
            total_size,
            total_samples,
            first_timestamp_us: first,
            last_timestamp_us: last,
        });
        return;
    }

    println!("Directory: {}", path.display());
    println!("  Blocks:  {} ({})", rows.len(), human_bytes(total_size));
    println!("  Samples: {}", total_samples);
    if let (Some(first), Some(last)) = (first, last) {
        println!("  Range:   {} .. {}", fmt_ts_us(first), fmt_ts_us(last));
    }
    println!();
    for r in &rows {
        let name = Path::new(&r.path)
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or(&r.path);
        println!(
            "  {:<52} {:>10} {:>8} series {:>10} samples",
            name,
            human_bytes(r.size),
            r.metadata.series_count,
            r.metadata.sample_count
        );
    }
}
