// File:    error.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: Error types shared by the pad store, the XOR codec and the relay wire format.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the pad store.
#[derive(Debug, Error)]
pub enum PadError {
    /// Every page in the pad file has been consumed. Not retryable until the
    /// pad is re-provisioned.
    #[error("pad exhausted: no unused pages remain")]
    Exhausted,

    /// A page identifier is not 8 printable characters free of `|` and `:`.
    #[error("invalid page identifier {0:?}")]
    InvalidPageId(String),

    /// The same identifier appears on more than one line of the pad file.
    #[error("duplicate page identifier {0} in pad file")]
    DuplicatePage(String),

    /// A page's content length differs from the first page's.
    #[error("page {id} has {found} pad bytes, expected {expected} like the first page")]
    UnevenPage {
        /// The offending page.
        id: String,
        /// Content length of the first page.
        expected: usize,
        /// Content length of this page.
        found: usize,
    },

    /// No page with this identifier exists in the loaded pad file.
    #[error("unknown page identifier {0}")]
    UnknownPage(String),

    /// A pad, consumed-pages or lock file could not be read or written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file the operation was performed on.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
}

impl PadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by the strict codec entry points.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The pad range is shorter than the data it would have to cover.
    #[error("pad too short: need {needed} bytes, {available} available")]
    PadTooShort {
        /// Bytes of pad the data requires.
        needed: usize,
        /// Bytes of pad left.
        available: usize,
    },

    /// An audio chunk does not fit into a single fresh page.
    #[error("chunk of {chunk} bytes exceeds page content of {page} bytes")]
    ChunkTooLarge {
        /// Length of the rejected chunk.
        chunk: usize,
        /// Content length of a page.
        page: usize,
    },
}

/// Errors raised while framing or parsing relay traffic.
#[derive(Debug, Error)]
pub enum WireError {
    /// A frame grew past the configured limit without a line terminator.
    #[error("frame too large: {0} bytes without a newline")]
    FrameTooLarge(usize),

    /// A frame is not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// A data frame has no `|` delimiter.
    #[error("malformed frame: missing '|' delimiter")]
    MalformedFrame,

    /// A ciphertext payload does not have the `page:hex` or `page:offset:hex` shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The ciphertext field is not valid hex.
    #[error("invalid ciphertext hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Errors raised while sealing or opening messages on a client.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The pad store failed, most importantly [`PadError::Exhausted`].
    #[error(transparent)]
    Pad(#[from] PadError),

    /// The message or chunk does not fit the pad page.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The received payload could not be parsed.
    #[error(transparent)]
    Wire(#[from] WireError),
}
