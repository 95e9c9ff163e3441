//! Discovery, selection and streaming of snapshot archives.
//!
//! An archive is a gzip-compressed tarball whose basename starts with the
//! capture start time in microseconds: `1589112000123456.tar.gz`. Its end
//! time is the file's modification time.

use crate::error::ImportError;
use chrono::{DateTime, TimeDelta, Utc};
use flate2::read::GzDecoder;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_SUFFIX: &str = ".tar.gz";

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotArchive {
    pub path: PathBuf,
    /// Microseconds since the Unix epoch, from the file name.
    pub start_us: i64,
    pub end: DateTime<Utc>,
}

/// How streaming of one archive ended.
#[derive(Debug)]
pub enum StreamEnd {
    Complete,
    /// The tar stream broke; entries after the failure were not visited.
    Truncated(io::Error),
}

impl SnapshotArchive {
    /// Builds an archive record from a path, reading its modification time.
    ///
    /// Returns `Ok(None)` when the basename does not start with a timestamp.
    pub fn from_path(path: &Path) -> io::Result<Option<Self>> {
        let Some(start_us) = parse_start(path) else {
            return Ok(None);
        };
        let modified = fs::metadata(path)?.modified()?;
        Ok(Some(Self {
            path: path.to_path_buf(),
            start_us,
            end: DateTime::<Utc>::from(modified),
        }))
    }

    /// Streams every regular-file entry in storage order.
    ///
    /// `visit` gets the entry path and a reader over its contents; it decides
    /// whether to read it. An error from `visit` stops streaming and is
    /// returned as is. A broken tar stream stops streaming and is reported
    /// through [`StreamEnd::Truncated`].
    pub fn stream_entries<F>(&self, mut visit: F) -> Result<StreamEnd, ImportError>
    where
        F: FnMut(&str, &mut dyn Read) -> Result<(), ImportError>,
    {
        let file = fs::File::open(&self.path).map_err(|source| ImportError::Archive {
            archive: self.path.clone(),
            source,
        })?;
        let mut tarball = tar::Archive::new(GzDecoder::new(io::BufReader::new(file)));
        let entries = tarball.entries().map_err(|source| ImportError::Archive {
            archive: self.path.clone(),
            source,
        })?;

        for entry in entries {
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Ok(StreamEnd::Truncated(e)),
            };
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = match entry.path() {
                Ok(p) => p.to_string_lossy().into_owned(),
                Err(e) => return Ok(StreamEnd::Truncated(e)),
            };
            let path = path.strip_prefix("./").unwrap_or(&path).to_string();
            visit(&path, &mut entry)?;
        }
        Ok(StreamEnd::Complete)
    }
}

/// Leading decimal digits of the basename up to the first `.`.
fn parse_start(path: &Path) -> Option<i64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.split('.').next()?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Lists archives in `dir` whose name ends in `suffix`, ordered by start time.
pub fn discover(dir: &Path, suffix: &str) -> Result<Vec<SnapshotArchive>, ImportError> {
    let discover_err = |source| ImportError::Discover {
        dir: dir.to_path_buf(),
        source,
    };

    let mut archives = Vec::new();
    for entry in fs::read_dir(dir).map_err(discover_err)? {
        let path = entry.map_err(discover_err)?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(suffix));
        if !matches || !path.is_file() {
            continue;
        }
        match SnapshotArchive::from_path(&path).map_err(discover_err)? {
            Some(archive) => archives.push(archive),
            None => warn!(path = %path.display(), "archive name has no timestamp, skipping"),
        }
    }

    archives.sort_by(|a, b| a.start_us.cmp(&b.start_us).then_with(|| a.path.cmp(&b.path)));
    debug!(count = archives.len(), dir = %dir.display(), "archives discovered");
    Ok(archives)
}

/// Applies the time window, then keeps only the last `last_n` archives.
///
/// `archives` must already be ordered by start time.
pub fn select(
    archives: Vec<SnapshotArchive>,
    now: DateTime<Utc>,
    window: TimeDelta,
    last_n: Option<usize>,
) -> Vec<SnapshotArchive> {
    let cutoff = now - window;
    let mut kept: Vec<SnapshotArchive> = archives
        .into_iter()
        .filter(|a| {
            let keep = a.end >= cutoff;
            if !keep {
                debug!(path = %a.path.display(), end = %a.end, "archive outside window");
            }
            keep
        })
        .collect();

    if let Some(n) = last_n
        && kept.len() > n
    {
        kept.drain(..kept.len() - n);
    }
    kept
}
