//! netsnap-core - backfill of archived wireless-router diagnostics snapshots.
//!
//! Provides:
//! - `archive` - archive discovery, time-window selection, entry streaming
//! - `classify` - entry path grammars (debugfs, netlink, conntrack)
//! - `netlink` - nl80211 station dump decoder
//! - `debugfs` - ath9k debugfs text parsers and their registry
//! - `conntrack` - `/proc/net/nf_conntrack` flow counters
//! - `emit` - metric points and canonical label sets
//! - `sink` - append/commit sinks (dry run, on-disk blocks)
//! - `pipeline` - the per-archive import driver
//! - `stations` - address to name table

pub mod archive;
pub mod classify;
pub mod config;
pub mod conntrack;
pub mod debugfs;
pub mod emit;
pub mod error;
pub mod netlink;
pub mod pipeline;
pub mod sink;
pub mod stations;

pub use config::{ImportConfig, SourceToggles};
pub use error::{EntryError, ImportError, SinkError, StationTableError};
pub use pipeline::{ArchiveStats, ImportSummary, IngestionPipeline};
pub use sink::{BlockStore, DryRunSink, Sink};
pub use stations::StationTable;
