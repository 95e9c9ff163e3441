use super::{ByteOrder, align4};
use crate::error::NetlinkError;

/// Size of `struct nlmsghdr`.
pub const MSG_HEADER_LEN: usize = 16;
/// Size of `struct genlmsghdr`.
pub const GENL_HEADER_LEN: usize = 4;
/// Types below this are netlink control messages (NOOP, ERROR, DONE, OVERRUN).
pub const NLMSG_MIN_TYPE: u16 = 0x10;
pub const NLM_F_MULTI: u16 = 0x2;
/// `NL80211_CMD_NEW_STATION`, the reply command of a station dump.
pub const CMD_NEW_STATION: u8 = 19;

/// Fixed netlink message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub length: u32,
    pub msg_type: u16,
    pub flags: u16,
    pub sequence: u32,
    pub pid: u32,
}

/// Generic netlink header that follows the message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenlHeader {
    pub command: u8,
    pub version: u8,
}

/// Parses one message from the front of `buf`.
///
/// Returns the header, the payload (`length - MSG_HEADER_LEN` bytes) and the
/// number of bytes the message occupies including padding, so the caller can
/// slide over a buffer holding several messages. `offset` is the absolute
/// position of `buf` in the capture and only feeds error messages.
pub fn decode_message(
    buf: &[u8],
    offset: usize,
    order: ByteOrder,
) -> Result<(MessageHeader, &[u8], usize), NetlinkError> {
    if buf.len() < MSG_HEADER_LEN {
        return Err(NetlinkError::ShortHeader {
            offset,
            remaining: buf.len(),
        });
    }

    let header = MessageHeader {
        length: order.u32([buf[0], buf[1], buf[2], buf[3]]),
        msg_type: order.u16([buf[4], buf[5]]),
        flags: order.u16([buf[6], buf[7]]),
        sequence: order.u32([buf[8], buf[9], buf[10], buf[11]]),
        pid: order.u32([buf[12], buf[13], buf[14], buf[15]]),
    };

    let length = header.length as usize;
    if length < MSG_HEADER_LEN {
        return Err(NetlinkError::LengthBelowHeader {
            offset,
            length: header.length,
        });
    }

    let consumed = align4(length);
    if consumed > buf.len() {
        return Err(NetlinkError::Truncated {
            offset,
            needed: consumed,
            remaining: buf.len(),
        });
    }

    Ok((header, &buf[MSG_HEADER_LEN..length], consumed))
}

/// Splits the generic netlink header off a message payload.
pub fn decode_genl_header(
    payload: &[u8],
    offset: usize,
) -> Result<(GenlHeader, &[u8]), NetlinkError> {
    if payload.len() < GENL_HEADER_LEN {
        return Err(NetlinkError::ShortGenlHeader { offset });
    }
    let header = GenlHeader {
        command: payload[0],
        version: payload[1],
    };
    Ok((header, &payload[GENL_HEADER_LEN..]))
}
