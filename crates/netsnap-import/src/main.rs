//! netsnap-import - Backfills archived router snapshots into a time-series store.
//!
//! Reads `<start_us>.tar.gz` snapshot archives in capture order, decodes the
//! debugfs, nl80211 and conntrack captures inside and commits one batch per
//! archive. Without `--add` it only counts what it would write.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Releases unused memory back to the operating system.
/// Called after each committed archive; decoded batches are dropped by then.
#[cfg(not(target_env = "msvc"))]
fn release_memory_to_os() {
    // SAFETY: We're calling jemalloc's mallctl with valid arguments.
    // arena.0.purge tells jemalloc to return unused pages to the OS.
    unsafe {
        tikv_jemalloc_sys::mallctl(
            c"arena.0.purge".as_ptr().cast(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        );
    }
}

#[cfg(target_env = "msvc")]
fn release_memory_to_os() {}

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{TimeDelta, Utc};
use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use netsnap_core::conntrack::DEFAULT_LOCAL_ADDRESS;
use netsnap_core::netlink::ByteOrder;
use netsnap_core::{
    BlockStore, DryRunSink, ImportConfig, ImportSummary, IngestionPipeline, Sink, SourceToggles,
    StationTable,
};

/// Snapshot archive importer.
#[derive(Parser, Debug)]
#[command(name = "netsnap-import", about = "Snapshot archive importer", version)]
struct Args {
    /// Directory holding the snapshot archives.
    #[arg(env = "NETSNAP_ARCHIVE_DIR", default_value = ".")]
    archive_dir: PathBuf,

    /// File name suffix of snapshot archives.
    #[arg(long, default_value = ".tar.gz")]
    suffix: String,

    /// Skip archives that ended more than this many days ago.
    #[arg(long, env = "NETSNAP_DAYS", default_value = "365")]
    days: u32,

    /// Import only the newest N archives of the window.
    #[arg(long, value_name = "N")]
    last: Option<usize>,

    /// Write points to the block store. Without it the import is a dry run.
    #[arg(long)]
    add: bool,

    /// Block store directory used with --add.
    #[arg(short, long, env = "NETSNAP_OUTPUT_DIR", default_value = "./blocks")]
    output_dir: PathBuf,

    /// Address to name table, one `address name` pair per line.
    #[arg(long, env = "NETSNAP_STATIONS", value_name = "PATH")]
    stations: Option<PathBuf>,

    /// Byte order of captured netlink dumps (big or little).
    #[arg(long, env = "NETSNAP_BYTE_ORDER", default_value = "big")]
    byte_order: ByteOrder,

    /// Address treated as local when telling conntrack directions apart.
    /// May be given more than once.
    #[arg(long = "local-address", value_name = "ADDR", default_value = DEFAULT_LOCAL_ADDRESS)]
    local_addresses: Vec<String>,

    /// Do not decode debugfs captures.
    #[arg(long)]
    no_debugfs: bool,

    /// Do not decode nl80211 station dumps.
    #[arg(long)]
    no_netlink: bool,

    /// Do not decode conntrack dumps.
    #[arg(long)]
    no_conntrack: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn import_config(&self) -> ImportConfig {
        ImportConfig {
            archive_dir: self.archive_dir.clone(),
            suffix: self.suffix.clone(),
            window: TimeDelta::days(i64::from(self.days)),
            last_n: self.last,
            sources: SourceToggles {
                debugfs: !self.no_debugfs,
                netlink: !self.no_netlink,
                conntrack: !self.no_conntrack,
            },
            byte_order: self.byte_order,
            local_addresses: self.local_addresses.clone(),
        }
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
/// `RUST_LOG`, when set, replaces the level chosen by the flags.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("netsnap_import={level},netsnap_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// One-line description of a finished run.
fn describe_summary(summary: &ImportSummary) -> String {
    let mut parts = vec![
        format!("{} archives", summary.archives),
        format!("{} entries", summary.entries),
        format!("{} points", summary.points),
    ];
    if summary.skipped > 0 {
        parts.push(format!("{} skipped", summary.skipped));
    }
    if summary.failed > 0 {
        parts.push(format!("{} failed", summary.failed));
    }
    if summary.truncated_archives > 0 {
        parts.push(format!("{} truncated", summary.truncated_archives));
    }
    parts.push(format!("{:.1} hours", summary.span_hours()));
    parts.join(", ")
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("netsnap-import {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Args: {:?}", args);

    let stations = match &args.stations {
        Some(path) => match StationTable::load(path) {
            Ok(table) => {
                info!("Loaded {} station names from {}", table.len(), path.display());
                table
            }
            Err(e) => {
                error!("Cannot load station table {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => StationTable::default(),
    };

    let config = args.import_config();
    info!(
        "Config: dir={}, window={} days, last={:?}, byte_order={:?}",
        config.archive_dir.display(),
        args.days,
        config.last_n,
        config.byte_order
    );
    let pipeline = IngestionPipeline::new(config, stations);

    let archives = match pipeline.select_archives(Utc::now()) {
        Ok(archives) => archives,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut sink: Box<dyn Sink> = if args.add {
        match BlockStore::new(&args.output_dir) {
            Ok(store) => {
                info!("Writing blocks to {}", store.dir().display());
                Box::new(store)
            }
            Err(e) => {
                error!("Cannot open block store {}: {}", args.output_dir.display(), e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        info!("Dry run: points are counted, not written (use --add to write)");
        Box::new(DryRunSink::new())
    };

    // Stop requests take effect between archives
    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Received shutdown signal, finishing current archive");
        s.store(true, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let total = archives.len();
    let mut done = 0;
    let result = pipeline.run(&archives, sink.as_mut(), Some(stop.as_ref()), |archive, stats| {
        done += 1;
        info!(
            "[{}/{}] {} ({} points)",
            done,
            total,
            archive.path.display(),
            stats.points
        );
        release_memory_to_os();
    });

    match result {
        Ok(summary) => {
            info!("Imported {}", describe_summary(&summary));
            if summary.stopped {
                warn!("Stopped early, {} archives not imported", total - summary.archives);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Import aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}
