//! Decoding of captured nl80211 station dumps.
//!
//! A capture file holds the raw buffers returned by `recvmsg()` on a generic
//! netlink socket after an `NL80211_CMD_GET_STATION` dump request. Each
//! buffer may carry several messages back to back.
//!
//! ```text
//! ┌──────────────── nlmsghdr (16) ───────────────┐┌ genlmsghdr (4) ┐┌ attributes ... ┐
//! │ len u32 │ type u16 │ flags u16 │ seq │ pid   ││ cmd │ ver │ -- ││ len │ type │ .. │
//! └──────────────────────────────────────────────┘└────────────────┘└────────────────┘
//! ```
//!
//! Messages and attributes are padded to 4-byte boundaries.

mod attr;
mod message;
mod station;

pub use attr::{ATTR_HEADER_LEN, Attribute, AttributeDecoder};
pub use message::{
    CMD_NEW_STATION, GENL_HEADER_LEN, GenlHeader, MSG_HEADER_LEN, MessageHeader, NLM_F_MULTI,
    NLMSG_MIN_TYPE, decode_genl_header, decode_message,
};
pub use station::{
    ATTR_MAC, ATTR_STA_INFO, FieldKind, STATION_INFO_FIELDS, StationField, decode_station_dump,
    field_for_code,
};

#[cfg(test)]
pub(crate) use station::tests::{encode_attr, encode_station_message};

use serde::{Deserialize, Serialize};

pub const JOB: &str = "nl80211";
/// Variable name prefix of every station-info series.
pub const VAR_BASE: &str = "stainfo";

/// Byte order of the integer fields inside a capture.
///
/// Captures are taken on the router itself, so fields are in that host's
/// native order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    pub fn u16(self, b: [u8; 2]) -> u16 {
        match self {
            ByteOrder::Big => u16::from_be_bytes(b),
            ByteOrder::Little => u16::from_le_bytes(b),
        }
    }

    pub fn u32(self, b: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Big => u32::from_be_bytes(b),
            ByteOrder::Little => u32::from_le_bytes(b),
        }
    }

    pub fn u64(self, b: [u8; 8]) -> u64 {
        match self {
            ByteOrder::Big => u64::from_be_bytes(b),
            ByteOrder::Little => u64::from_le_bytes(b),
        }
    }

    #[cfg(test)]
    pub(crate) fn put_u16(self, v: u16) -> [u8; 2] {
        match self {
            ByteOrder::Big => v.to_be_bytes(),
            ByteOrder::Little => v.to_le_bytes(),
        }
    }

    #[cfg(test)]
    pub(crate) fn put_u32(self, v: u32) -> [u8; 4] {
        match self {
            ByteOrder::Big => v.to_be_bytes(),
            ByteOrder::Little => v.to_le_bytes(),
        }
    }
}

impl std::str::FromStr for ByteOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "big" | "be" => Ok(ByteOrder::Big),
            "little" | "le" => Ok(ByteOrder::Little),
            other => Err(format!("unknown byte order '{}' (expected big or little)", other)),
        }
    }
}

/// Rounds `len` up to the netlink 4-byte alignment.
pub const fn align4(len: usize) -> usize {
    (len + 3) & !3
}
