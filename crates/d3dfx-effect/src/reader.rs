//! Bounds-checked little-endian reads over an effect blob.
//!
//! The container mixes two addressing modes: the table of contents is consumed sequentially
//! through a [`Cursor`], while type descriptors, values and strings are reached through offsets
//! relative to the TOC base and read with [`read_u32_le`].

use crate::error::EffectError;

/// Bytes consumed by an object block whose payload is `len` bytes long.
pub(crate) fn padded_len(len: u32) -> usize {
    (len as usize).div_ceil(4) * 4
}

pub(crate) fn read_u32_le(
    bytes: &[u8],
    offset: usize,
    what: &'static str,
) -> Result<u32, EffectError> {
    let end = offset
        .checked_add(4)
        .ok_or(EffectError::UnexpectedEof(what))?;
    let slice = bytes
        .get(offset..end)
        .ok_or(EffectError::UnexpectedEof(what))?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

pub(crate) fn read_bytes<'a>(
    bytes: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], EffectError> {
    let end = offset
        .checked_add(len)
        .ok_or(EffectError::UnexpectedEof(what))?;
    bytes.get(offset..end).ok_or(EffectError::UnexpectedEof(what))
}

/// Reads a length-prefixed string at `offset`. A zero length means "no string".
///
/// The stored bytes usually include a NUL terminator; everything from the first NUL on is
/// dropped.
pub(crate) fn read_string(bytes: &[u8], offset: usize) -> Result<Option<String>, EffectError> {
    let len = read_u32_le(bytes, offset, "string length")? as usize;
    if len == 0 {
        return Ok(None);
    }
    let raw = read_bytes(bytes, offset + 4, len, "string")?;
    Ok(Some(c_string(raw)))
}

/// Decodes a NUL-terminated (or unterminated) byte string.
pub(crate) fn c_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Sequential reader with a running remaining-length count.
#[derive(Debug, Clone)]
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn read_u32(&mut self, what: &'static str) -> Result<u32, EffectError> {
        let value = read_u32_le(self.bytes, self.pos, what)?;
        self.pos += 4;
        Ok(value)
    }

    pub fn skip(&mut self, n: usize, what: &'static str) -> Result<(), EffectError> {
        if n > self.remaining() {
            return Err(EffectError::UnexpectedEof(what));
        }
        self.pos += n;
        Ok(())
    }

    /// Returns the next `len` bytes and advances past them plus the padding to a 4-byte
    /// boundary. Padding missing at the very end of the blob is tolerated.
    pub fn read_block(&mut self, len: u32, what: &'static str) -> Result<&'a [u8], EffectError> {
        let data = read_bytes(self.bytes, self.pos, len as usize, what)?;
        self.pos = (self.pos + padded_len(len)).min(self.bytes.len());
        Ok(data)
    }
}
