//! Routing of archive entry paths to decoders.
//!
//! Every entry path starts with the capture timestamp in microseconds,
//! followed by the path the file was captured from:
//!
//! ```text
//! 1589112000123456/sys/kernel/debug/ieee80211/phy0/netdev:wlan0/stations/<mac>/rc_stats
//! 1589112000123456/nl80211/wlan0/stations/0003
//! 1589112000123456/proc/net/nf_conntrack
//! ```

use crate::error::EntryError;
use regex::Regex;

/// What kind of capture an entry holds, with the identifiers its path carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Debugfs {
        phy: String,
        /// `ath9k`, `statistics` or `netdev:<name>`.
        category: String,
        /// Path below the category directory.
        leaf: String,
    },
    Netlink {
        device: String,
    },
    Conntrack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTag {
    Debugfs,
    Netlink,
    Conntrack,
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Recognized { timestamp_us: i64, kind: EntryKind },
    Unrecognized,
}

impl Classification {
    pub fn tag(&self) -> EntryTag {
        match self {
            Classification::Recognized { kind, .. } => match kind {
                EntryKind::Debugfs { .. } => EntryTag::Debugfs,
                EntryKind::Netlink { .. } => EntryTag::Netlink,
                EntryKind::Conntrack => EntryTag::Conntrack,
            },
            Classification::Unrecognized => EntryTag::Unrecognized,
        }
    }
}

/// Holds the compiled path grammars. Built once, shared by reference.
pub struct PathClassifier {
    debugfs: Regex,
    netlink: Regex,
    conntrack: Regex,
}

impl PathClassifier {
    pub fn new() -> Self {
        Self {
            debugfs: Regex::new(
                r"^(\d+)/sys/kernel/debug/ieee80211/(phy\d+)/(ath9k|netdev:\w+|statistics)/(.*)$",
            )
            .expect("static regex"),
            netlink: Regex::new(r"^(\d+)/nl80211/(\w+)/stations/\d+$").expect("static regex"),
            conntrack: Regex::new(r"^(\d+)/proc/net/nf_conntrack$").expect("static regex"),
        }
    }

    /// Matches `path` against the grammars in order: debugfs, netlink,
    /// conntrack. Only a timestamp that does not fit in an i64 is an error.
    pub fn classify(&self, path: &str) -> Result<Classification, EntryError> {
        if let Some(caps) = self.debugfs.captures(path) {
            return Ok(Classification::Recognized {
                timestamp_us: parse_timestamp(path, &caps[1])?,
                kind: EntryKind::Debugfs {
                    phy: caps[2].to_string(),
                    category: caps[3].to_string(),
                    leaf: caps[4].to_string(),
                },
            });
        }

        if let Some(caps) = self.netlink.captures(path) {
            return Ok(Classification::Recognized {
                timestamp_us: parse_timestamp(path, &caps[1])?,
                kind: EntryKind::Netlink {
                    device: caps[2].to_string(),
                },
            });
        }

        if let Some(caps) = self.conntrack.captures(path) {
            return Ok(Classification::Recognized {
                timestamp_us: parse_timestamp(path, &caps[1])?,
                kind: EntryKind::Conntrack,
            });
        }

        Ok(Classification::Unrecognized)
    }
}

impl Default for PathClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_timestamp(path: &str, digits: &str) -> Result<i64, EntryError> {
    digits.parse().map_err(|_| EntryError::BadTimestamp {
        path: path.to_string(),
        value: digits.to_string(),
    })
}
