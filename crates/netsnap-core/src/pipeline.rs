//! Archive-by-archive import driver.
//!
//! Archives are processed strictly in start-time order. For each one every
//! entry is classified, decoded and appended, then the batch is committed
//! before the next archive is opened. Fatal entry errors and commit failures
//! abort the run; other entry errors drop that entry only.

use crate::archive::{self, SnapshotArchive, StreamEnd};
use crate::classify::{Classification, EntryKind, PathClassifier};
use crate::config::ImportConfig;
use crate::conntrack::{self, ConntrackDecoder};
use crate::debugfs::ParserRegistry;
use crate::emit::{Emission, MetricEmitter, SeriesContext};
use crate::error::{EntryError, ImportError};
use crate::netlink;
use crate::sink::Sink;
use crate::stations::StationTable;
use chrono::{DateTime, Utc};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn, warn_span};

/// Result of decoding one entry.
#[derive(Debug)]
pub enum EntryOutcome {
    Decoded {
        timestamp_us: i64,
        ctx: SeriesContext,
        emissions: Vec<Emission>,
    },
    /// Source disabled or debugfs leaf not in the registry.
    Skipped,
}

/// Per-archive counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveStats {
    pub entries: u64,
    pub skipped: u64,
    pub failed: u64,
    pub points: u64,
    /// The tar stream broke before its end.
    pub truncated: bool,
}

/// Totals of a whole run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImportSummary {
    pub archives: usize,
    pub entries: u64,
    pub skipped: u64,
    pub failed: u64,
    pub points: u64,
    pub truncated_archives: usize,
    /// Start of the first archive committed.
    pub first_start_us: Option<i64>,
    /// End of the last archive committed.
    pub last_end: Option<DateTime<Utc>>,
    /// A stop was requested before every archive was processed.
    pub stopped: bool,
}

impl ImportSummary {
    fn add(&mut self, archive: &SnapshotArchive, stats: &ArchiveStats) {
        self.archives += 1;
        self.entries += stats.entries;
        self.skipped += stats.skipped;
        self.failed += stats.failed;
        self.points += stats.points;
        if stats.truncated {
            self.truncated_archives += 1;
        }
        self.first_start_us.get_or_insert(archive.start_us);
        self.last_end = Some(archive.end);
    }

    /// Hours between the first archive's start and the last archive's end.
    pub fn span_hours(&self) -> f64 {
        match (self.first_start_us, self.last_end) {
            (Some(start), Some(end)) => {
                (end.timestamp_micros() - start).max(0) as f64 / 3_600_000_000.0
            }
            _ => 0.0,
        }
    }
}

/// Owns the immutable decoding state shared by every archive of a run.
pub struct IngestionPipeline {
    config: ImportConfig,
    stations: StationTable,
    classifier: PathClassifier,
    registry: ParserRegistry,
    conntrack: ConntrackDecoder,
}

impl IngestionPipeline {
    pub fn new(config: ImportConfig, stations: StationTable) -> Self {
        let conntrack = ConntrackDecoder::new(config.local_addresses.iter().cloned());
        Self {
            config,
            stations,
            classifier: PathClassifier::new(),
            registry: ParserRegistry::new(),
            conntrack,
        }
    }

    /// Lists and filters the archives to import, oldest first.
    pub fn select_archives(&self, now: DateTime<Utc>) -> Result<Vec<SnapshotArchive>, ImportError> {
        let found = archive::discover(&self.config.archive_dir, &self.config.suffix)?;
        let total = found.len();
        let selected = archive::select(found, now, self.config.window, self.config.last_n);
        info!(
            "Selected {} of {} archives in {}",
            selected.len(),
            total,
            self.config.archive_dir.display()
        );
        if selected.is_empty() {
            return Err(ImportError::NoArchives);
        }
        Ok(selected)
    }

    /// Imports `archives` in order, committing once per archive.
    ///
    /// `stop` is checked between archives only. `on_committed` runs after each
    /// successful commit.
    pub fn run<S, F>(
        &self,
        archives: &[SnapshotArchive],
        sink: &mut S,
        stop: Option<&AtomicBool>,
        mut on_committed: F,
    ) -> Result<ImportSummary, ImportError>
    where
        S: Sink + ?Sized,
        F: FnMut(&SnapshotArchive, &ArchiveStats),
    {
        let mut summary = ImportSummary::default();
        for (i, archive) in archives.iter().enumerate() {
            if stop.is_some_and(|s| s.load(Ordering::SeqCst)) {
                warn!(remaining = archives.len() - i, "stop requested, not starting next archive");
                summary.stopped = true;
                break;
            }
            let stats = self.import_archive(archive, sink)?;
            summary.add(archive, &stats);
            on_committed(archive, &stats);
        }
        Ok(summary)
    }

    /// Streams one archive into the sink and commits the batch.
    pub fn import_archive<S>(
        &self,
        archive: &SnapshotArchive,
        sink: &mut S,
    ) -> Result<ArchiveStats, ImportError>
    where
        S: Sink + ?Sized,
    {
        debug!(path = %archive.path.display(), start_us = archive.start_us, "opening archive");
        let mut stats = ArchiveStats::default();
        let mut emitter = MetricEmitter::new(&mut *sink);

        let end = archive.stream_entries(|path, reader| {
            // Decoder warnings are reported inside this span.
            let _entry =
                warn_span!("entry", archive = %archive.path.display(), entry = path).entered();
            stats.entries += 1;
            match self.decode_entry(path, reader) {
                Ok(EntryOutcome::Decoded {
                    timestamp_us,
                    ctx,
                    emissions,
                }) => emitter
                    .emit_all(&ctx, timestamp_us, &emissions)
                    .map_err(|source| ImportError::Append {
                        archive: archive.path.clone(),
                        source,
                    }),
                Ok(EntryOutcome::Skipped) => {
                    stats.skipped += 1;
                    Ok(())
                }
                Err(e) if e.is_fatal() => Err(ImportError::Entry {
                    archive: archive.path.clone(),
                    entry: path.to_string(),
                    source: e,
                }),
                Err(e) => {
                    warn!(error = %e, "dropping entry");
                    stats.failed += 1;
                    Ok(())
                }
            }
        })?;

        if let StreamEnd::Truncated(e) = end {
            warn!(
                archive = %archive.path.display(),
                error = %e,
                "archive stream broken, committing what was read"
            );
            stats.truncated = true;
        }
        stats.points = emitter.points();

        sink.commit().map_err(|source| ImportError::Commit {
            archive: archive.path.clone(),
            source,
        })?;
        info!(
            "Committed {}: {} entries, {} points",
            archive.path.display(),
            stats.entries,
            stats.points
        );
        Ok(stats)
    }

    /// Classifies and decodes one entry. Disabled sources are not read.
    pub fn decode_entry(&self, path: &str, reader: &mut dyn Read) -> Result<EntryOutcome, EntryError> {
        let (timestamp_us, kind) = match self.classifier.classify(path)? {
            Classification::Recognized { timestamp_us, kind } => (timestamp_us, kind),
            Classification::Unrecognized => return Err(EntryError::UnmatchedPath(path.to_string())),
        };

        let sources = &self.config.sources;
        let enabled = match kind {
            EntryKind::Debugfs { .. } => sources.debugfs,
            EntryKind::Netlink { .. } => sources.netlink,
            EntryKind::Conntrack => sources.conntrack,
        };
        if !enabled {
            return Ok(EntryOutcome::Skipped);
        }

        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        let decoded = match kind {
            EntryKind::Debugfs {
                phy,
                category,
                leaf,
            } => {
                let text = String::from_utf8_lossy(&data);
                self.registry
                    .decode(&self.stations, &phy, &category, &leaf, &text)?
            }
            EntryKind::Netlink { device } => {
                let emissions =
                    netlink::decode_station_dump(&data, self.config.byte_order, &self.stations)?;
                let ctx = SeriesContext::new(netlink::JOB, netlink::VAR_BASE)
                    .with_label("netdev", device);
                Some((ctx, emissions))
            }
            EntryKind::Conntrack => {
                let text = String::from_utf8_lossy(&data);
                let emissions = self.conntrack.decode(&text, &self.stations)?;
                Some((SeriesContext::new(conntrack::JOB, "conntrack"), emissions))
            }
        };

        Ok(match decoded {
            Some((ctx, emissions)) => EntryOutcome::Decoded {
                timestamp_us,
                ctx,
                emissions,
            },
            None => EntryOutcome::Skipped,
        })
    }
}
