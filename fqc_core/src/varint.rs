//! LEB128 varints, zigzag mapping, and a bounds-checked byte cursor shared by
//! the reorder map and the per-block stream codecs.

use crate::error::{Error, Result};

/// Worst-case encoded size of a `u64` varint.
pub const MAX_VARINT_LEN: usize = 10;

#[inline]
pub fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[inline]
pub fn put_signed(out: &mut Vec<u8>, value: i64) {
    put_varint(out, zigzag_encode(value));
}

/// Forward-only reader over a byte slice. Every read reports truncation as
/// [`Error::InvalidFormat`] tagged with `what`.
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, pos: 0, what }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| self.truncated())?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(Error::format(format!("{}: varint longer than 10 bytes", self.what)))
    }

    pub fn signed(&mut self) -> Result<i64> {
        self.varint().map(zigzag_decode)
    }

    /// Reads a varint and checks it fits a `usize` no larger than `limit`.
    pub fn length(&mut self, limit: usize) -> Result<usize> {
        let value = self.varint()?;
        if value > limit as u64 {
            return Err(Error::format(format!(
                "{}: length {} exceeds limit {}",
                self.what, value, limit
            )));
        }
        Ok(value as usize)
    }

    pub fn u8(&mut self) -> Result<u8> {
        let byte = *self.buf.get(self.pos).ok_or_else(|| self.truncated())?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(self.truncated());
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn truncated(&self) -> Error {
        Error::format(format!("{}: truncated at byte {}", self.what, self.pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zigzag_small_magnitudes_stay_small() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        assert_eq!(zigzag_decode(zigzag_encode(i64::MIN)), i64::MIN);
        assert_eq!(zigzag_decode(zigzag_encode(i64::MAX)), i64::MAX);
    }

    #[test]
    fn test_varint_widths() {
        let mut buf = Vec::new();
        put_varint(&mut buf, 127);
        assert_eq!(buf.len(), 1);
        buf.clear();
        put_varint(&mut buf, 128);
        assert_eq!(buf, [0x80, 0x01]);
        buf.clear();
        put_varint(&mut buf, u64::MAX);
        assert_eq!(buf.len(), MAX_VARINT_LEN);
        let mut cur = ByteCursor::new(&buf, "test");
        assert_eq!(cur.varint().unwrap(), u64::MAX);
        assert!(cur.is_empty());
    }

    #[test]
    fn test_truncated_varint_is_format_error() {
        let mut cur = ByteCursor::new(&[0x80, 0x80], "stream");
        let err = cur.varint().unwrap_err();
        assert!(format!("{err}").contains("stream: truncated"));
    }

    #[test]
    fn test_length_limit() {
        let mut buf = Vec::new();
        put_varint(&mut buf, 500);
        let mut cur = ByteCursor::new(&buf, "ids");
        assert!(cur.length(499).is_err());
    }
}
