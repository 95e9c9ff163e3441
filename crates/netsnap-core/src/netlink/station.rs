use super::message::{
    CMD_NEW_STATION, MSG_HEADER_LEN, NLM_F_MULTI, NLMSG_MIN_TYPE, decode_genl_header,
    decode_message,
};
use super::{Attribute, AttributeDecoder, ByteOrder};
use crate::emit::{Emission, Labels};
use crate::error::NetlinkError;
use crate::stations::StationTable;
use tracing::trace;

/// `NL80211_ATTR_MAC`.
pub const ATTR_MAC: u16 = 6;
/// `NL80211_ATTR_STA_INFO`.
pub const ATTR_STA_INFO: u16 = 21;

/// How a station-info attribute is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Fixed-width integer.
    Fixed { width: usize, signed: bool },
    /// Nested attribute set (bitrates, BSS parameters). Not emitted.
    Nested,
}

/// One entry of the `NL80211_STA_INFO_*` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationField {
    pub code: u16,
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn fixed(code: u16, name: &'static str, width: usize, signed: bool) -> StationField {
    StationField {
        code,
        name,
        kind: FieldKind::Fixed { width, signed },
    }
}

const fn nested(code: u16, name: &'static str) -> StationField {
    StationField {
        code,
        name,
        kind: FieldKind::Nested,
    }
}

/// Station-info attributes in code order. Names match the series already
/// stored for live data (`stainfo_<name>`).
pub static STATION_INFO_FIELDS: [StationField; 16] = [
    fixed(1, "inactivetime", 4, false),
    fixed(2, "rxbytes", 4, false),
    fixed(3, "txbytes", 4, false),
    fixed(4, "llid", 2, false),
    fixed(5, "plid", 2, false),
    fixed(6, "plinkstate", 1, false),
    fixed(7, "signal", 1, true),
    nested(8, "txbitrate"),
    fixed(9, "rxpackets", 4, false),
    fixed(10, "txpackets", 4, false),
    fixed(11, "txretries", 4, false),
    fixed(12, "txfailed", 4, false),
    fixed(13, "signalavg", 1, true),
    nested(14, "rxbitrate"),
    nested(15, "bssparam"),
    fixed(16, "connectedtime", 4, false),
];

/// Looks up the descriptor for a station-info attribute code.
pub fn field_for_code(code: u16) -> Option<&'static StationField> {
    STATION_INFO_FIELDS.iter().find(|f| f.code == code)
}

fn decode_fixed(
    field: &StationField,
    width: usize,
    signed: bool,
    attr: &Attribute<'_>,
    order: ByteOrder,
) -> Result<f64, NetlinkError> {
    let bytes = attr.value;
    if bytes.len() < width {
        return Err(NetlinkError::ShortField {
            offset: attr.offset,
            field: field.name,
            width,
            actual: bytes.len(),
        });
    }
    let b = &bytes[..width];
    let value = match (width, signed) {
        (1, false) => b[0] as f64,
        (1, true) => b[0] as i8 as f64,
        (2, false) => order.u16([b[0], b[1]]) as f64,
        (2, true) => order.u16([b[0], b[1]]) as i16 as f64,
        (4, false) => order.u32([b[0], b[1], b[2], b[3]]) as f64,
        (4, true) => order.u32([b[0], b[1], b[2], b[3]]) as i32 as f64,
        (_, false) => order.u64([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f64,
        (_, true) => order.u64([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as i64 as f64,
    };
    Ok(value)
}

/// Formats a hardware address as lower-case colon-separated hex.
pub(crate) fn format_hwaddr(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn decode_station_info(
    station: &str,
    info: &[u8],
    base: usize,
    order: ByteOrder,
    out: &mut Vec<Emission>,
) -> Result<(), NetlinkError> {
    let mut attrs = AttributeDecoder::new(info, base, order);
    for attr in attrs.by_ref() {
        let Some(field) = field_for_code(attr.attr_type) else {
            continue;
        };
        let FieldKind::Fixed { width, signed } = field.kind else {
            continue;
        };
        let value = decode_fixed(field, width, signed, &attr, order)?;
        let mut labels = Labels::new();
        labels.insert("station".to_string(), station.to_string());
        out.push(Emission::new(field.name, labels, value));
    }
    attrs.finish()
}

/// Decodes a captured station dump buffer into per-field emissions.
///
/// Every emission carries a `station` label; the key is the field name.
pub fn decode_station_dump(
    data: &[u8],
    order: ByteOrder,
    stations: &StationTable,
) -> Result<Vec<Emission>, NetlinkError> {
    let mut out = Vec::new();
    let mut offset = 0;

    while data.len() - offset >= MSG_HEADER_LEN {
        let (header, payload, consumed) = decode_message(&data[offset..], offset, order)?;
        if header.msg_type < NLMSG_MIN_TYPE {
            return Err(NetlinkError::TypeTooSmall {
                offset,
                msg_type: header.msg_type,
            });
        }
        if header.flags != NLM_F_MULTI {
            return Err(NetlinkError::UnexpectedFlags {
                offset,
                flags: header.flags,
            });
        }

        let payload_offset = offset + MSG_HEADER_LEN;
        let (genl, attrs_buf) = decode_genl_header(payload, payload_offset)?;
        if genl.command != CMD_NEW_STATION {
            return Err(NetlinkError::UnexpectedCommand {
                offset,
                command: genl.command,
            });
        }

        let attrs_base = payload_offset + super::GENL_HEADER_LEN;
        let mut station: Option<String> = None;
        let mut attrs = AttributeDecoder::new(attrs_buf, attrs_base, order);
        for attr in attrs.by_ref() {
            match attr.attr_type {
                ATTR_MAC => {
                    let mac = format_hwaddr(attr.value);
                    station = Some(stations.resolve(&mac).to_string());
                }
                ATTR_STA_INFO => {
                    let Some(name) = station.as_deref() else {
                        return Err(NetlinkError::MissingStation {
                            offset: attr.offset,
                        });
                    };
                    trace!(station = name, offset = attr.offset, "station info");
                    decode_station_info(
                        name,
                        attr.value,
                        attr.offset + super::ATTR_HEADER_LEN,
                        order,
                        &mut out,
                    )?;
                }
                _ => {}
            }
        }
        attrs.finish()?;

        offset += consumed;
    }

    Ok(out)
}
