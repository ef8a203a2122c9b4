// File:    registry.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: The map from live peer identifiers to their connection outboxes.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

//! Live peers.
//!
//! [`PeerRegistry`] is a plain map. It is only ever touched through the
//! broker's single lock, which is what makes a check-then-insert atomic.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use otp_core::wire::FRAME_DELIMITER;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

/// Longest identifier a peer may register.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Writes queued for a connection's writer task. Each item is one or more
/// lines joined by `\n`, without the final terminator.
pub type Outbox = mpsc::Sender<String>;

/// Why a registration was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegisterError {
    /// Empty or otherwise unusable identifier.
    #[error("invalid identifier")]
    Invalid,
    /// Another live connection holds the identifier.
    #[error("identifier already taken")]
    AlreadyTaken,
    /// The registering connection went away before it could be served.
    #[error("connection closed during registration")]
    Transport,
}

/// Trims a registration frame and checks that it can serve as an identifier.
///
/// # Errors
///
/// [`RegisterError::Invalid`] for empty or over-long identifiers and for
/// identifiers containing `|` or control characters.
pub fn validate_identifier(raw: &str) -> Result<&str, RegisterError> {
    let id = raw.trim();
    if id.is_empty()
        || id.len() > MAX_IDENTIFIER_LEN
        || id.chars().any(|c| c == FRAME_DELIMITER || c.is_control())
    {
        return Err(RegisterError::Invalid);
    }
    Ok(id)
}

/// The registry's view of one connection.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    conn: Uuid,
    outbox: Outbox,
    kick: Arc<Notify>,
}

impl PeerHandle {
    /// Wraps a connection's token and outbox with a fresh disconnect signal.
    #[must_use]
    pub fn new(conn: Uuid, outbox: Outbox) -> Self {
        Self {
            conn,
            outbox,
            kick: Arc::new(Notify::new()),
        }
    }

    /// The token of the owning connection.
    #[must_use]
    pub const fn conn(&self) -> Uuid {
        self.conn
    }

    /// Queues one write for the peer without waiting.
    ///
    /// # Errors
    ///
    /// [`TrySendError::Full`] if the peer has stopped reading and its outbox
    /// is at capacity, [`TrySendError::Closed`] if its writer has gone away.
    /// Either way the write is handed back.
    pub fn send(&self, line: String) -> Result<(), TrySendError<String>> {
        self.outbox.try_send(line)
    }

    /// Asks the owning connection to close.
    pub fn disconnect(&self) {
        self.kick.notify_one();
    }

    /// Completes once [`PeerHandle::disconnect`] has been called on any
    /// clone of this handle.
    pub async fn disconnected(&self) {
        self.kick.notified().await;
    }

    /// Whether the connection's writer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}

/// Maps each live identifier to exactly one connection.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerHandle>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `id` to `handle`.
    ///
    /// # Errors
    ///
    /// [`RegisterError::Invalid`] for an empty identifier,
    /// [`RegisterError::AlreadyTaken`] if `id` is live.
    pub fn register(&mut self, id: &str, handle: PeerHandle) -> Result<(), RegisterError> {
        if id.is_empty() {
            return Err(RegisterError::Invalid);
        }
        match self.peers.entry(id.to_owned()) {
            Entry::Occupied(_) => Err(RegisterError::AlreadyTaken),
            Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Removes `id` whoever holds it. Removing an absent id is a no-op.
    pub fn unregister(&mut self, id: &str) -> Option<PeerHandle> {
        self.peers.remove(id)
    }

    /// Removes `id` only if it is still held by connection `conn`.
    pub fn unregister_connection(&mut self, id: &str, conn: Uuid) -> bool {
        if self.peers.get(id).is_some_and(|h| h.conn == conn) {
            self.peers.remove(id);
            true
        } else {
            false
        }
    }

    /// The connection currently registered as `id`.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<&PeerHandle> {
        self.peers.get(id)
    }

    /// Number of live peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
