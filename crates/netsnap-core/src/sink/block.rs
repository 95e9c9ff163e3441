//! On-disk block store: one immutable file per committed batch.
//!
//! File layout:
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ HEADER (40 bytes, uncompressed, little-endian)          │
//! │   magic: [u8; 4]              = b"NSB1"                 │
//! │   version: u16                = 1                       │
//! │   _reserved: u16              = 0                       │
//! │   series_count: u32                                     │
//! │   payload_crc32: u32          (over compressed payload) │
//! │   sample_count: u64                                     │
//! │   min_timestamp_us: i64                                 │
//! │   max_timestamp_us: i64                                 │
//! ├─────────────────────────────────────────────────────────┤
//! │ PAYLOAD (one zstd frame)                                │
//! │   zstd(postcard(BlockPayload))                          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Files are named `block_<min>_<max>[_<n>].zst` so a directory listing
//! sorts them by time.

use super::interner::{StringInterner, series_id};
use super::{Sink, validate_labels};
use crate::emit::Labels;
use crate::error::SinkError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read as _, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MAGIC: [u8; 4] = *b"NSB1";
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 40;
const ZSTD_LEVEL: i32 = 3;

pub const BLOCK_EXTENSION: &str = "zst";
const BLOCK_PREFIX: &str = "block_";

#[derive(Debug, Default, Serialize, Deserialize)]
struct SeriesRecord {
    labels: Vec<(u64, u64)>,
    samples: Vec<(i64, f64)>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BlockPayload {
    strings: StringInterner,
    series: Vec<SeriesRecord>,
}

/// Header fields of a block file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockMetadata {
    pub series_count: u32,
    pub sample_count: u64,
    pub min_timestamp_us: i64,
    pub max_timestamp_us: i64,
    #[serde(skip)]
    crc: u32,
}

impl BlockMetadata {
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..6].copy_from_slice(&VERSION.to_le_bytes());
        // bytes 6..8 = reserved
        header[8..12].copy_from_slice(&self.series_count.to_le_bytes());
        header[12..16].copy_from_slice(&self.crc.to_le_bytes());
        header[16..24].copy_from_slice(&self.sample_count.to_le_bytes());
        header[24..32].copy_from_slice(&self.min_timestamp_us.to_le_bytes());
        header[32..40].copy_from_slice(&self.max_timestamp_us.to_le_bytes());
        header
    }

    fn decode(header: &[u8; HEADER_SIZE]) -> io::Result<Self> {
        let magic = &header[0..4];
        if magic != MAGIC {
            return Err(io::Error::other(format!(
                "invalid magic: expected NSB1, got {:?}",
                magic
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(io::Error::other(format!(
                "unsupported version: {}",
                version
            )));
        }

        let u32_at = |at: usize| u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]);
        let mut word = [0u8; 8];
        let mut u64_at = |at: usize| {
            word.copy_from_slice(&header[at..at + 8]);
            u64::from_le_bytes(word)
        };

        let sample_count = u64_at(16);
        let min_timestamp_us = u64_at(24) as i64;
        let max_timestamp_us = u64_at(32) as i64;
        Ok(Self {
            series_count: u32_at(8),
            crc: u32_at(12),
            sample_count,
            min_timestamp_us,
            max_timestamp_us,
        })
    }
}

/// One series read back from a block.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub labels: Labels,
    pub samples: Vec<(i64, f64)>,
}

/// Reads only the 40-byte header of a block file.
pub fn read_block_metadata(path: &Path) -> io::Result<BlockMetadata> {
    let mut file = fs::File::open(path)?;
    let mut header = [0u8; HEADER_SIZE];
    file.read_exact(&mut header)?;
    BlockMetadata::decode(&header)
}

/// Lists block files in `dir`, oldest first.
pub fn list_blocks(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut blocks = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_block = path.extension().is_some_and(|ext| ext == BLOCK_EXTENSION)
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(BLOCK_PREFIX));
        if is_block && path.is_file() {
            blocks.push(path);
        }
    }
    blocks.sort();
    Ok(blocks)
}

/// Fully decoded block file.
pub struct BlockReader {
    metadata: BlockMetadata,
    series: Vec<Series>,
}

impl BlockReader {
    /// Reads a block, checks its checksum and resolves every label set.
    pub fn open(path: &Path) -> io::Result<Self> {
        let data = fs::read(path)?;
        if data.len() < HEADER_SIZE {
            return Err(io::Error::other("file too small for header"));
        }
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&data[..HEADER_SIZE]);
        let metadata = BlockMetadata::decode(&header)?;

        let compressed = &data[HEADER_SIZE..];
        let crc = crc32fast::hash(compressed);
        if crc != metadata.crc {
            return Err(io::Error::other(format!(
                "payload checksum mismatch: header {:#010x}, computed {:#010x}",
                metadata.crc, crc
            )));
        }

        let raw = zstd::decode_all(compressed)?;
        let payload: BlockPayload = postcard::from_bytes(&raw).map_err(|e| {
            warn!(path = %path.display(), error = %e, "block: payload deserialization failed");
            io::Error::other(e)
        })?;

        let mut series = Vec::with_capacity(payload.series.len());
        for record in payload.series {
            let labels = payload
                .strings
                .resolve_labels(&record.labels)
                .ok_or_else(|| io::Error::other("label string missing from block"))?;
            series.push(Series {
                labels,
                samples: record.samples,
            });
        }

        Ok(Self { metadata, series })
    }

    pub fn metadata(&self) -> &BlockMetadata {
        &self.metadata
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }

    pub fn into_series(self) -> Vec<Series> {
        self.series
    }
}

/// Sink that stages one batch in memory and writes it as a block on commit.
pub struct BlockStore {
    dir: PathBuf,
    interner: StringInterner,
    staged: HashMap<u64, SeriesRecord>,
    sample_count: u64,
    min_ts: i64,
    max_ts: i64,
    blocks_written: u64,
}

impl BlockStore {
    /// Opens (creating if needed) a block directory and removes leftover
    /// `.tmp` files from interrupted commits.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                warn!(path = %path.display(), "removing incomplete block");
                fs::remove_file(&path)?;
            }
        }

        Ok(Self {
            dir,
            interner: StringInterner::new(),
            staged: HashMap::new(),
            sample_count: 0,
            min_ts: i64::MAX,
            max_ts: i64::MIN,
            blocks_written: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    /// Number of samples appended since the last commit.
    pub fn staged_samples(&self) -> u64 {
        self.sample_count
    }

    fn next_block_path(&self) -> PathBuf {
        let stem = format!("{}{:016}_{:016}", BLOCK_PREFIX, self.min_ts, self.max_ts);
        let mut path = self.dir.join(format!("{}.{}", stem, BLOCK_EXTENSION));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}_{}.{}", stem, n, BLOCK_EXTENSION));
            n += 1;
        }
        path
    }

    fn reset(&mut self) {
        self.interner.clear();
        self.staged.clear();
        self.sample_count = 0;
        self.min_ts = i64::MAX;
        self.max_ts = i64::MIN;
    }

    fn write_block(&mut self, path: &Path) -> Result<BlockMetadata, SinkError> {
        let mut ids: Vec<u64> = self.staged.keys().copied().collect();
        ids.sort_unstable();
        let series: Vec<SeriesRecord> = ids
            .iter()
            .filter_map(|id| self.staged.remove(id))
            .collect();
        let series_count = u32::try_from(series.len())
            .map_err(|_| SinkError::Io(io::Error::other("too many series for block format")))?;

        let payload = BlockPayload {
            strings: std::mem::take(&mut self.interner),
            series,
        };
        let raw = postcard::to_allocvec(&payload)?;
        let compressed = zstd::encode_all(&raw[..], ZSTD_LEVEL)?;

        let metadata = BlockMetadata {
            series_count,
            sample_count: self.sample_count,
            min_timestamp_us: self.min_ts,
            max_timestamp_us: self.max_ts,
            crc: crc32fast::hash(&compressed),
        };

        let tmp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&metadata.encode())?;
        file.write_all(&compressed)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, path)?;
        debug!(
            path = %path.display(),
            raw = raw.len(),
            compressed = compressed.len(),
            "block written"
        );
        Ok(metadata)
    }
}

impl Sink for BlockStore {
    fn append(&mut self, labels: &Labels, timestamp_us: i64, value: f64) -> Result<(), SinkError> {
        validate_labels(labels)?;
        let id = series_id(labels);
        let interner = &mut self.interner;
        let record = self.staged.entry(id).or_insert_with(|| SeriesRecord {
            labels: interner.intern_labels(labels),
            samples: Vec::new(),
        });
        record.samples.push((timestamp_us, value));
        self.sample_count += 1;
        self.min_ts = self.min_ts.min(timestamp_us);
        self.max_ts = self.max_ts.max(timestamp_us);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        if self.sample_count == 0 {
            debug!("empty batch, nothing to write");
            return Ok(());
        }

        let path = self.next_block_path();
        let result = self.write_block(&path);
        self.reset();
        let metadata = result?;
        self.blocks_written += 1;

        info!(
            path = %path.display(),
            series = metadata.series_count,
            samples = metadata.sample_count,
            "block committed"
        );
        Ok(())
    }
}
