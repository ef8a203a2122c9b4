// File:    wire.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: Line framing, relay replies and ciphertext payload formats shared by relay and clients.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

//! The relay wire protocol.
//!
//! Every frame is one UTF-8 line. A peer first sends its bare identifier,
//! then `recipient|payload` data frames. The relay forwards them as
//! `sender|payload`. Payloads are opaque to the relay; clients use
//! [`CipherPayload`] for them.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BytesMut};

use crate::error::WireError;
use crate::pad_store::PageId;

/// Default upper bound for a single frame, terminator excluded.
pub const MAX_FRAME_LEN: usize = 65_536;

/// Separates the addressed identifier from the payload.
pub const FRAME_DELIMITER: char = '|';

/// Separates the sub-fields of a ciphertext payload.
pub const PAYLOAD_DELIMITER: char = ':';

/// Reply to an empty or unusable registration frame.
pub const REPLY_INVALID_ID: &str = "Invalid userID. Connection closed.";
/// Reply when the identifier is already registered.
pub const REPLY_ID_TAKEN: &str = "UserID already taken. Connection closed.";
/// Reply to a successful registration.
pub const REPLY_CONNECTED: &str = "Connected successfully.";
/// Reply to a data frame with no `|`.
pub const REPLY_INVALID_FORMAT: &str = "Invalid message format.";

/// Reply when the recipient has never registered.
#[must_use]
pub fn reply_recipient_not_found(recipient: &str) -> String {
    format!("Recipient '{recipient}' not found.")
}

/// Reply when the recipient's pending queue is full and new mail is refused.
#[must_use]
pub fn reply_queue_full(recipient: &str) -> String {
    format!("Recipient '{recipient}' queue full.")
}

/// Appends `line` and its terminator to an outgoing buffer.
pub fn encode_line(line: &str, dst: &mut Vec<u8>) {
    dst.reserve(line.len() + 1);
    dst.extend_from_slice(line.as_bytes());
    dst.push(b'\n');
}

/// Attempts to extract one complete line from a read buffer.
///
/// Returns `Ok(Some(line))` with the terminator (and a trailing `\r`)
/// removed, `Ok(None)` if more data is needed, or an error if the buffered
/// line already exceeds `max_len` or is not UTF-8. The buffer is advanced
/// past the consumed line in both the success and the UTF-8 error case.
///
/// # Errors
///
/// [`WireError::FrameTooLarge`] or [`WireError::InvalidUtf8`].
pub fn try_decode_line(buf: &mut BytesMut, max_len: usize) -> Result<Option<String>, WireError> {
    let Some(pos) = buf.iter().position(|b| *b == b'\n') else {
        if buf.len() > max_len {
            return Err(WireError::FrameTooLarge(buf.len()));
        }
        return Ok(None);
    };
    if pos > max_len {
        return Err(WireError::FrameTooLarge(pos));
    }

    let mut line = buf.split_to(pos).to_vec();
    buf.advance(1);
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line)
        .map(Some)
        .map_err(|_| WireError::InvalidUtf8)
}

/// A `peer|payload` frame, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame<'a> {
    /// Recipient on the way in, sender on the way out.
    pub peer: &'a str,
    /// Everything after the first `|`, uninterpreted.
    pub payload: &'a str,
}

impl<'a> DataFrame<'a> {
    /// Splits a frame at its first `|`.
    ///
    /// # Errors
    ///
    /// [`WireError::MalformedFrame`] when there is no delimiter.
    pub fn parse(frame: &'a str) -> Result<Self, WireError> {
        frame
            .split_once(FRAME_DELIMITER)
            .map(|(peer, payload)| Self { peer, payload })
            .ok_or(WireError::MalformedFrame)
    }

    /// Renders the frame as a single line body.
    #[must_use]
    pub fn render(peer: &str, payload: &str) -> String {
        format!("{peer}{FRAME_DELIMITER}{payload}")
    }
}

/// A pad-encrypted payload as exchanged between clients.
///
/// Text messages start at pad offset 0 and use the two-field form
/// `PAGEID:HEX`. Audio chunks carry their pad offset: `PAGEID:OFFSET:HEX`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherPayload {
    /// The pad page the ciphertext was produced with.
    pub page_id: PageId,
    /// Index of the first pad byte used.
    pub offset: usize,
    /// The XORed bytes.
    pub ciphertext: Vec<u8>,
}

impl fmt::Display for CipherPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(&self.ciphertext);
        if self.offset == 0 {
            write!(f, "{}{PAYLOAD_DELIMITER}{hex}", self.page_id)
        } else {
            write!(
                f,
                "{}{PAYLOAD_DELIMITER}{}{PAYLOAD_DELIMITER}{hex}",
                self.page_id, self.offset
            )
        }
    }
}

impl FromStr for CipherPayload {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(PAYLOAD_DELIMITER).collect();
        let (page, offset, hex_body) = match fields.as_slice() {
            [page, hex_body] => (*page, 0, *hex_body),
            [page, offset, hex_body] => {
                let offset = offset
                    .parse::<usize>()
                    .map_err(|_| WireError::MalformedPayload(format!("bad offset {offset:?}")))?;
                (*page, offset, *hex_body)
            }
            _ => {
                return Err(WireError::MalformedPayload(format!(
                    "expected 2 or 3 ':'-separated fields, got {}",
                    fields.len()
                )));
            }
        };
        let page_id = page
            .parse()
            .map_err(|_| WireError::MalformedPayload(format!("bad page id {page:?}")))?;
        Ok(Self {
            page_id,
            offset,
            ciphertext: hex::decode(hex_body)?,
        })
    }
}
