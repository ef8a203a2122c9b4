// File:    codec.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: The XOR transform shared by text messages and audio chunks.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

//! This module contains the one-time-pad XOR transform.
//!
//! The same function encrypts and decrypts. [`transform`] keeps the lenient
//! behaviour peers rely on for wire compatibility: bytes past the end of the
//! pad are passed through untouched. The messaging layer uses [`seal`] in
//! both directions, which refuses to leave any byte unencrypted.

use crate::error::CodecError;

/// XORs `data[i]` with `pad[i]` for every `i < min(data.len(), pad.len())`.
///
/// Bytes of `data` beyond the end of `pad` are copied through unchanged.
/// Applying the transform twice with the same pad bytes yields `data` again.
#[must_use]
pub fn transform(data: &[u8], pad: &[u8]) -> Vec<u8> {
    let covered = data.len().min(pad.len());
    let mut out = Vec::with_capacity(data.len());
    out.extend(data[..covered].iter().zip(pad).map(|(d, p)| d ^ p));
    out.extend_from_slice(&data[covered..]);
    out
}

/// Like [`transform`], but fails instead of passing bytes through.
///
/// # Errors
///
/// Returns [`CodecError::PadTooShort`] if `pad` is shorter than `data`.
pub fn seal(data: &[u8], pad: &[u8]) -> Result<Vec<u8>, CodecError> {
    if pad.len() < data.len() {
        return Err(CodecError::PadTooShort {
            needed: data.len(),
            available: pad.len(),
        });
    }
    Ok(transform(data, pad))
}

/// A forward-only position inside one page's content.
///
/// Every call to [`PadCursor::take`] hands out pad bytes that no earlier call
/// returned, so consecutive chunks never share keystream.
#[derive(Debug, Clone)]
pub struct PadCursor<'a> {
    pad: &'a [u8],
    offset: usize,
}

impl<'a> PadCursor<'a> {
    /// Starts a cursor at the beginning of `pad`.
    #[must_use]
    pub const fn new(pad: &'a [u8]) -> Self {
        Self { pad, offset: 0 }
    }

    /// The offset of the next unused pad byte.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Pad bytes not yet handed out.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.pad.len() - self.offset
    }

    /// Takes the next `len` pad bytes, returning their starting offset.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::PadTooShort`] without moving the cursor when
    /// fewer than `len` bytes remain.
    pub fn take(&mut self, len: usize) -> Result<(usize, &'a [u8]), CodecError> {
        if len > self.remaining() {
            return Err(CodecError::PadTooShort {
                needed: len,
                available: self.remaining(),
            });
        }
        let pad = self.pad;
        let start = self.offset;
        self.offset += len;
        Ok((start, &pad[start..self.offset]))
    }

    /// Encrypts (or decrypts) one chunk with the next unused pad bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::PadTooShort`] when the chunk does not fit.
    pub fn apply(&mut self, chunk: &[u8]) -> Result<(usize, Vec<u8>), CodecError> {
        let (start, pad) = self.take(chunk.len())?;
        Ok((start, transform(chunk, pad)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_xors_bytewise() {
        assert_eq!(transform(&[0b1010, 0xFF], &[0b0110, 0x0F]), vec![0b1100, 0xF0]);
    }

    #[test]
    fn transform_passes_through_beyond_pad() {
        let out = transform(b"abcdef", &[0, 0, 0xFF]);
        assert_eq!(&out[..2], b"ab");
        assert_eq!(out[2], b'c' ^ 0xFF);
        assert_eq!(&out[3..], b"def");
    }

    #[test]
    fn transform_ignores_surplus_pad() {
        assert_eq!(transform(b"hi", b"\x01\x01\x01\x01"), b"ih".to_vec());
    }

    #[test]
    fn seal_rejects_short_pad() {
        assert_eq!(
            seal(b"hello", b"abc"),
            Err(CodecError::PadTooShort {
                needed: 5,
                available: 3
            })
        );
    }

    #[test]
    fn cursor_never_reuses_bytes() {
        let pad: Vec<u8> = (0..10).collect();
        let mut cursor = PadCursor::new(&pad);
        let (a, first) = cursor.take(4).unwrap();
        let (b, second) = cursor.take(4).unwrap();
        assert_eq!((a, b), (0, 4));
        assert_eq!(first, &[0, 1, 2, 3]);
        assert_eq!(second, &[4, 5, 6, 7]);
        assert_eq!(cursor.remaining(), 2);

        assert!(cursor.take(3).is_err());
        assert_eq!(cursor.offset(), 8, "a failed take must not advance");
    }
}
