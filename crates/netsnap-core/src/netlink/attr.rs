use super::{ByteOrder, align4};
use crate::error::NetlinkError;

/// Size of `struct nlattr` (len u16 + type u16), already aligned.
pub const ATTR_HEADER_LEN: usize = 4;

/// One decoded attribute, borrowing its value from the source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute<'a> {
    /// Absolute offset of the attribute header within the capture.
    pub offset: usize,
    /// Declared length including the header.
    pub length: u16,
    pub attr_type: u16,
    /// Exactly `length - ATTR_HEADER_LEN` bytes (empty for undersized lengths).
    pub value: &'a [u8],
}

/// Walks the attributes packed in a buffer.
///
/// Iteration stops at the end of the buffer or at the first malformed
/// attribute. In the latter case the error is kept and must be collected
/// with [`AttributeDecoder::finish`] once the loop ends.
pub struct AttributeDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
    base: usize,
    order: ByteOrder,
    err: Option<NetlinkError>,
}

impl<'a> AttributeDecoder<'a> {
    /// `base` is the absolute offset of `buf` within the capture, used only
    /// for error reporting.
    pub fn new(buf: &'a [u8], base: usize, order: ByteOrder) -> Self {
        Self {
            buf,
            pos: 0,
            base,
            order,
            err: None,
        }
    }

    /// Returns the error that stopped iteration, if any.
    pub fn err(&self) -> Option<&NetlinkError> {
        self.err.as_ref()
    }

    /// Consumes the decoder, turning a recorded error into `Err`.
    pub fn finish(self) -> Result<(), NetlinkError> {
        match self.err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fail(&mut self, reason: String) -> Option<Attribute<'a>> {
        self.err = Some(NetlinkError::Attribute {
            offset: self.base + self.pos,
            reason,
        });
        None
    }
}

impl<'a> Iterator for AttributeDecoder<'a> {
    type Item = Attribute<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.err.is_some() || self.pos >= self.buf.len() {
            return None;
        }

        let rest = &self.buf[self.pos..];
        if rest.len() < ATTR_HEADER_LEN {
            return self.fail(format!(
                "not enough bytes for attribute header ({} < {})",
                rest.len(),
                ATTR_HEADER_LEN
            ));
        }

        let length = self.order.u16([rest[0], rest[1]]);
        let attr_type = self.order.u16([rest[2], rest[3]]);
        if length as usize > rest.len() {
            return self.fail(format!(
                "not enough bytes for attribute data ({} > {})",
                length,
                rest.len()
            ));
        }

        let value = if (length as usize) < ATTR_HEADER_LEN {
            &rest[0..0]
        } else {
            &rest[ATTR_HEADER_LEN..length as usize]
        };

        let attr = Attribute {
            offset: self.base + self.pos,
            length,
            attr_type,
            value,
        };
        self.pos += ATTR_HEADER_LEN.max(align4(length as usize));
        Some(attr)
    }
}
