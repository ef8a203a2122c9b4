// File:    messaging.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: Client-side sealing and opening of text messages and audio chunks with pad pages.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

//! Turning plaintext into relay payloads and back.
//!
//! Senders claim pages through [`PadStore::claim_next_unused_page`];
//! receivers look pages up by identifier and record them as consumed once
//! decryption succeeded.

use std::collections::HashSet;

use crate::codec::{self, PadCursor};
use crate::error::{CodecError, MessagingError, PadError};
use crate::pad_store::{PadPage, PadStore, PageId};
use crate::wire::CipherPayload;

/// Encrypts a text message with a freshly claimed page.
///
/// # Errors
///
/// [`CodecError::PadTooShort`] if the message is longer than a page (no
/// page is claimed in that case), or a [`PadError`], notably
/// [`PadError::Exhausted`].
pub fn seal_message(store: &PadStore, plaintext: &[u8]) -> Result<CipherPayload, MessagingError> {
    let available = store.page_length();
    if plaintext.len() > available {
        return Err(CodecError::PadTooShort {
            needed: plaintext.len(),
            available,
        }
        .into());
    }
    let page = store.claim_next_unused_page()?;
    Ok(CipherPayload {
        page_id: page.id().clone(),
        offset: 0,
        ciphertext: codec::seal(plaintext, page.content())?,
    })
}

fn decrypt<'s>(
    store: &'s PadStore,
    payload: &CipherPayload,
) -> Result<(&'s PadPage, Vec<u8>), MessagingError> {
    let page = store
        .page(payload.page_id.as_str())
        .ok_or_else(|| PadError::UnknownPage(payload.page_id.to_string()))?;
    let pad = page.content().get(payload.offset..).unwrap_or_default();
    let plaintext = codec::seal(&payload.ciphertext, pad)?;
    Ok((page, plaintext))
}

/// Decrypts a received payload and then records its page as consumed.
///
/// # Errors
///
/// [`PadError::UnknownPage`] if the page is not in this pad,
/// [`CodecError::PadTooShort`] if the ciphertext overruns the page, or an
/// I/O error while recording consumption.
pub fn open_message(store: &PadStore, payload: &CipherPayload) -> Result<Vec<u8>, MessagingError> {
    let (page, plaintext) = decrypt(store, payload)?;
    store.mark_identifier_consumed(page.id().as_str())?;
    Ok(plaintext)
}

/// Encrypts a stream of fixed-size chunks, advancing through pad bytes
/// monotonically and claiming a new page whenever the current one cannot
/// hold the next chunk.
///
/// The unused tail of an abandoned page is never reused.
#[derive(Debug)]
pub struct ChunkSealer<'s> {
    store: &'s PadStore,
    current: Option<(&'s PageId, PadCursor<'s>)>,
}

impl<'s> ChunkSealer<'s> {
    /// Starts sealing with pages from `store`. No page is claimed yet.
    #[must_use]
    pub const fn new(store: &'s PadStore) -> Self {
        Self {
            store,
            current: None,
        }
    }

    /// The page currently being consumed, if any.
    #[must_use]
    pub fn current_page(&self) -> Option<&PageId> {
        self.current.as_ref().map(|(id, _)| *id)
    }

    /// Encrypts one chunk.
    ///
    /// # Errors
    ///
    /// [`CodecError::ChunkTooLarge`] if no page can hold the chunk, or a
    /// [`PadError`] such as [`PadError::Exhausted`] when a new page is needed.
    pub fn seal_chunk(&mut self, chunk: &[u8]) -> Result<CipherPayload, MessagingError> {
        let (page_id, mut cursor) = match self.current.take() {
            Some((id, cursor)) if cursor.remaining() >= chunk.len() => (id, cursor),
            stale => {
                let page_length = self.store.page_length();
                if chunk.len() > page_length {
                    self.current = stale;
                    return Err(CodecError::ChunkTooLarge {
                        chunk: chunk.len(),
                        page: page_length,
                    }
                    .into());
                }
                let page = self.store.claim_next_unused_page()?;
                (page.id(), PadCursor::new(page.content()))
            }
        };
        let (offset, ciphertext) = cursor.apply(chunk)?;
        self.current = Some((page_id, cursor));
        Ok(CipherPayload {
            page_id: page_id.clone(),
            offset,
            ciphertext,
        })
    }
}

/// Decrypts chunk payloads, recording each page as consumed the first time
/// it is seen.
#[derive(Debug)]
pub struct ChunkOpener<'s> {
    store: &'s PadStore,
    marked: HashSet<PageId>,
}

impl<'s> ChunkOpener<'s> {
    /// Starts opening chunks against `store`.
    #[must_use]
    pub fn new(store: &'s PadStore) -> Self {
        Self {
            store,
            marked: HashSet::new(),
        }
    }

    /// Decrypts one chunk.
    ///
    /// # Errors
    ///
    /// As for [`open_message`].
    pub fn open_chunk(&mut self, payload: &CipherPayload) -> Result<Vec<u8>, MessagingError> {
        let (page, plaintext) = decrypt(self.store, payload)?;
        if !self.marked.contains(page.id()) {
            self.store.mark_identifier_consumed(page.id().as_str())?;
            self.marked.insert(page.id().clone());
        }
        Ok(plaintext)
    }
}
