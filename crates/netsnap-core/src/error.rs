//! Error types for the snapshot import pipeline.
//!
//! Errors are split by where they originate. Every decoder error knows
//! whether it must abort the run (`is_fatal`) or only drop the entry that
//! produced it.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures while decoding netlink frames and attributes.
///
/// All of these mean the captured bytes no longer look like a station dump,
/// so every variant is fatal.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetlinkError {
    #[error("short message header at offset {offset}: {remaining} bytes remain")]
    ShortHeader { offset: usize, remaining: usize },

    #[error("message at offset {offset} declares length {length} below header size")]
    LengthBelowHeader { offset: usize, length: u32 },

    #[error("message at offset {offset} needs {needed} bytes, only {remaining} remain")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("message at offset {offset} has type {msg_type:#x} below NLMSG_MIN_TYPE")]
    TypeTooSmall { offset: usize, msg_type: u16 },

    #[error("message at offset {offset} has flags {flags:#x}, expected multi-part")]
    UnexpectedFlags { offset: usize, flags: u16 },

    #[error("generic netlink header truncated at offset {offset}")]
    ShortGenlHeader { offset: usize },

    #[error("unexpected generic netlink command {command} at offset {offset}")]
    UnexpectedCommand { offset: usize, command: u8 },

    #[error("attribute at offset {offset}: {reason}")]
    Attribute { offset: usize, reason: String },

    #[error("station info at offset {offset} without a preceding hardware address")]
    MissingStation { offset: usize },

    #[error("field {field} at offset {offset} needs {width} bytes, attribute carries {actual}")]
    ShortField {
        offset: usize,
        field: &'static str,
        width: usize,
        actual: usize,
    },
}

/// Failures in the strict debugfs table strategies.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TableError {
    #[error("invalid integer {value:?} in line {line:?}")]
    InvalidInteger { line: String, value: String },

    #[error("line {line:?} too short for column at {start}..{end}")]
    ShortLine {
        line: String,
        start: usize,
        end: usize,
    },

    #[error("table has no header line")]
    MissingHeader,

    #[error("rate table has no summary line (last lines: {tail:?})")]
    MissingSummary { tail: Vec<String> },
}

/// Failures while decoding a conntrack dump.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConntrackError {
    #[error("invalid counter {key}={value:?} in line {line:?}")]
    InvalidCounter {
        key: String,
        value: String,
        line: String,
    },
}

/// Failures while loading the address to name table.
#[derive(Debug, Error)]
pub enum StationTableError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("line {line}: expected 'address name', got {content:?}")]
    Malformed { line: usize, content: String },
}

/// Why a single archive entry failed to decode.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("path does not match any capture grammar: {0}")]
    UnmatchedPath(String),

    #[error("bad capture timestamp {value:?} in {path}")]
    BadTimestamp { path: String, value: String },

    #[error("netlink: {0}")]
    Netlink(#[from] NetlinkError),

    #[error("table: {0}")]
    Table(#[from] TableError),

    #[error("conntrack: {0}")]
    Conntrack(#[from] ConntrackError),

    #[error("read: {0}")]
    Read(#[from] io::Error),
}

impl EntryError {
    /// Returns true when the error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        match self {
            EntryError::UnmatchedPath(_)
            | EntryError::BadTimestamp { .. }
            | EntryError::Netlink(_)
            | EntryError::Table(_) => true,
            EntryError::Conntrack(_) | EntryError::Read(_) => false,
        }
    }
}

/// Failures reported by a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] postcard::Error),

    #[error("invalid label set: {0}")]
    InvalidLabels(String),
}

/// Top-level import failure. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{}:{entry}: {source}", archive.display())]
    Entry {
        archive: PathBuf,
        entry: String,
        #[source]
        source: EntryError,
    },

    #[error("{}: cannot open archive: {source}", archive.display())]
    Archive {
        archive: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: append failed: {source}", archive.display())]
    Append {
        archive: PathBuf,
        #[source]
        source: SinkError,
    },

    #[error("{}: commit failed: {source}", archive.display())]
    Commit {
        archive: PathBuf,
        #[source]
        source: SinkError,
    },

    #[error("listing archives in {}: {source}", dir.display())]
    Discover {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("time window retained zero archives")]
    NoArchives,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_taxonomy() {
        assert!(EntryError::UnmatchedPath("x".into()).is_fatal());
        assert!(EntryError::Netlink(NetlinkError::MissingStation { offset: 0 }).is_fatal());
        assert!(EntryError::Table(TableError::MissingHeader).is_fatal());

        let counter = ConntrackError::InvalidCounter {
            key: "bytes".into(),
            value: "x".into(),
            line: String::new(),
        };
        assert!(!EntryError::Conntrack(counter).is_fatal());
        assert!(!EntryError::Read(io::Error::other("eof")).is_fatal());
    }

    #[test]
    fn test_entry_error_display_carries_paths() {
        let err = ImportError::Entry {
            archive: PathBuf::from("/a/1.tar.gz"),
            entry: "1/proc/net/nf_conntrack".into(),
            source: EntryError::UnmatchedPath("zzz".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("/a/1.tar.gz"));
        assert!(msg.contains("1/proc/net/nf_conntrack"));
    }
}
