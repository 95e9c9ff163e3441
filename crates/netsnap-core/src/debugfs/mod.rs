//! Decoding of captured `/sys/kernel/debug/ieee80211` files.
//!
//! Only a closed set of leaf files is understood. Each known leaf maps to one
//! parsing [`Strategy`]; leaves under `stations/<address>/` use a separate
//! table and get a `station` label.

pub mod parser;

use crate::emit::{Emission, SeriesContext};
use crate::error::{EntryError, TableError};
use crate::stations::StationTable;
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, trace};

pub use parser::{
    COLUMN_WIDTHS, parse_column_table, parse_flag_list, parse_int_prefixed, parse_rate_table,
    parse_row_table, parse_scalar,
};

pub const JOB: &str = "ath9k";
const STATION_PREFIX: &str = "stations_";

/// How a leaf file's text is turned into emissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Scalar,
    FlagList,
    RowTable,
    ColumnTable,
    RateTable,
}

const DEVICE_FILES: &[(&str, Strategy)] = &[
    ("antenna_diversity", Strategy::Scalar),
    ("chanbw", Strategy::Scalar),
    ("diag", Strategy::Scalar),
    ("gpio_mask", Strategy::Scalar),
    ("gpio_val", Strategy::Scalar),
    ("regval", Strategy::Scalar),
    ("rx_chainmask", Strategy::Scalar),
    ("spectral_count", Strategy::Scalar),
    ("spectral_fft_period", Strategy::Scalar),
    ("spectral_period", Strategy::Scalar),
    ("spectral_scan_ctl", Strategy::Scalar),
    ("spectral_short_repeat", Strategy::Scalar),
    ("tpc", Strategy::Scalar),
    ("tx_chainmask", Strategy::Scalar),
    ("ap_power_level", Strategy::Scalar),
    ("dtim_count", Strategy::Scalar),
    ("flags", Strategy::Scalar),
    ("num_buffered_multicast", Strategy::Scalar),
    ("num_mcast_sta", Strategy::Scalar),
    ("num_sta_ps", Strategy::Scalar),
    ("rc_rateidx_mask_2ghz", Strategy::Scalar),
    ("rc_rateidx_mask_5ghz", Strategy::Scalar),
    ("state", Strategy::Scalar),
    ("interrupt", Strategy::RowTable),
    ("phy_err", Strategy::RowTable),
    ("recv", Strategy::RowTable),
    ("reset", Strategy::RowTable),
    ("xmit", Strategy::ColumnTable),
    ("ani", Strategy::RowTable),
    ("dot11ACKFailureCount", Strategy::Scalar),
    ("dot11FCSErrorCount", Strategy::Scalar),
    ("dot11RTSFailureCount", Strategy::Scalar),
    ("dot11RTSSuccessCount", Strategy::Scalar),
];

const STATION_FILES: &[(&str, Strategy)] = &[
    ("flags", Strategy::FlagList),
    ("last_ack_signal", Strategy::Scalar),
    ("rx_duplicates", Strategy::Scalar),
    ("rx_fragments", Strategy::Scalar),
    ("tx_filtered", Strategy::Scalar),
    ("rc_stats", Strategy::RateTable),
];

/// Immutable leaf-file registry. Built once and shared by reference.
pub struct ParserRegistry {
    device: HashMap<&'static str, Strategy>,
    station: HashMap<&'static str, Strategy>,
    station_leaf: Regex,
    rate_summary: Regex,
}

/// A leaf path split into its table and file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leaf<'a> {
    Device(&'a str),
    Station { address: &'a str, file: &'a str },
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            device: DEVICE_FILES.iter().copied().collect(),
            station: STATION_FILES.iter().copied().collect(),
            station_leaf: Regex::new(r"^stations/([0-9a-f:]+)/(.*)$").expect("static regex"),
            rate_summary: Regex::new(parser::RATE_SUMMARY_PATTERN).expect("static regex"),
        }
    }

    /// Splits a leaf path. `None` means the path claims to be a station file
    /// but its address segment is malformed.
    pub fn split_leaf<'a>(&self, leaf: &'a str) -> Option<Leaf<'a>> {
        if !leaf.starts_with("stations/") {
            return Some(Leaf::Device(leaf));
        }
        let caps = self.station_leaf.captures(leaf)?;
        let address = caps.get(1)?.as_str();
        let file = caps.get(2)?.as_str();
        Some(Leaf::Station { address, file })
    }

    pub fn strategy(&self, leaf: &Leaf<'_>) -> Option<Strategy> {
        match leaf {
            Leaf::Device(file) => self.device.get(file).copied(),
            Leaf::Station { file, .. } => self.station.get(file).copied(),
        }
    }

    /// Runs a strategy over file text.
    pub fn run(&self, strategy: Strategy, text: &str) -> Result<Vec<Emission>, TableError> {
        match strategy {
            Strategy::Scalar => Ok(parse_scalar(text)),
            Strategy::FlagList => Ok(parse_flag_list(text)),
            Strategy::RowTable => parse_row_table(text),
            Strategy::ColumnTable => parse_column_table(text),
            Strategy::RateTable => parse_rate_table(text, &self.rate_summary),
        }
    }

    /// Decodes one debugfs file.
    ///
    /// Returns `Ok(None)` for leaves not in the registry; those are ignored.
    pub fn decode(
        &self,
        stations: &StationTable,
        phy: &str,
        category: &str,
        leaf: &str,
        text: &str,
    ) -> Result<Option<(SeriesContext, Vec<Emission>)>, EntryError> {
        let split = self
            .split_leaf(leaf)
            .ok_or_else(|| EntryError::UnmatchedPath(leaf.to_string()))?;

        let Some(strategy) = self.strategy(&split) else {
            debug!(phy, leaf, "ignoring unknown debugfs file");
            return Ok(None);
        };
        trace!(phy, leaf, ?strategy, input = %text, "debugfs input");

        let mut ctx = match split {
            Leaf::Device(file) => SeriesContext::new(JOB, file),
            Leaf::Station { address, file } => {
                SeriesContext::new(JOB, format!("{}{}", STATION_PREFIX, file))
                    .with_label("station", stations.resolve(address))
            }
        };
        ctx = ctx.with_label("phy", phy);
        if let Some(netdev) = category.strip_prefix("netdev:") {
            ctx = ctx.with_label("netdev", netdev);
        }

        let emissions = self.run(strategy, text)?;
        Ok(Some((ctx, emissions)))
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_tables() {
        let reg = ParserRegistry::new();
        assert_eq!(reg.strategy(&Leaf::Device("xmit")), Some(Strategy::ColumnTable));
        assert_eq!(reg.strategy(&Leaf::Device("flags")), Some(Strategy::Scalar));
        assert_eq!(
            reg.strategy(&Leaf::Station {
                address: "00:11:22:33:44:55",
                file: "flags"
            }),
            Some(Strategy::FlagList)
        );
        assert_eq!(reg.strategy(&Leaf::Device("rc_stats")), None);
        assert_eq!(reg.strategy(&Leaf::Device("regdump")), None);
    }

    #[test]
    fn test_split_leaf() {
        let reg = ParserRegistry::new();
        assert_eq!(reg.split_leaf("tpc"), Some(Leaf::Device("tpc")));
        assert_eq!(
            reg.split_leaf("stations/0a:bb:cc:dd:ee:ff/rc_stats"),
            Some(Leaf::Station {
                address: "0a:bb:cc:dd:ee:ff",
                file: "rc_stats"
            })
        );
        assert_eq!(reg.split_leaf("stations/NOT-A-MAC/flags"), None);
    }

    #[test]
    fn test_decode_device_scalar() {
        let reg = ParserRegistry::new();
        let (ctx, out) = reg
            .decode(&StationTable::default(), "phy0", "ath9k", "tpc", "ENABLED\n")
            .unwrap()
            .unwrap();
        assert_eq!(ctx.job, "ath9k");
        assert_eq!(ctx.base, "tpc");
        assert_eq!(ctx.labels["phy"], "phy0");
        assert!(!ctx.labels.contains_key("netdev"));
        assert_eq!(out, vec![Emission::plain("", 1.0)]);
    }

    #[test]
    fn test_decode_station_file() {
        let reg = ParserRegistry::new();
        let stations = StationTable::from_pairs([("00:11:22:33:44:55", "laptop")]);
        let (ctx, out) = reg
            .decode(
                &stations,
                "phy0",
                "netdev:wlan0",
                "stations/00:11:22:33:44:55/flags",
                "AUTH\nASSOC\n",
            )
            .unwrap()
            .unwrap();
        assert_eq!(ctx.base, "stations_flags");
        assert_eq!(ctx.labels["station"], "laptop");
        assert_eq!(ctx.labels["netdev"], "wlan0");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_decode_unknown_leaf_is_ignored() {
        let reg = ParserRegistry::new();
        let res = reg
            .decode(&StationTable::default(), "phy0", "ath9k", "regdump", "junk")
            .unwrap();
        assert!(res.is_none());
    }

    #[test]
    fn test_decode_bad_station_path_is_fatal() {
        let reg = ParserRegistry::new();
        let err = reg
            .decode(&StationTable::default(), "phy0", "netdev:wlan0", "stations/zz/flags", "")
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_decode_row_table_error_propagates() {
        let reg = ParserRegistry::new();
        let err = reg
            .decode(&StationTable::default(), "phy0", "ath9k", "reset", "Baseband Hang: x\n")
            .unwrap_err();
        assert!(matches!(err, EntryError::Table(_)));
        assert!(err.is_fatal());
    }
}
