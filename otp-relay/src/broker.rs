// File:    broker.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: The relay broker: registration, routing and store-and-forward under one lock.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

//! The relay's shared state and the operations connections perform on it.
//!
//! Registry, pending queues and the set of identifiers seen since start-up
//! sit behind a single mutex. Every operation takes it once and never holds
//! it across an `.await`; outgoing lines are pushed into bounded
//! per-connection outboxes without waiting, so nothing inside the lock
//! blocks on a socket. A peer whose outbox is full is not reading; it is
//! disconnected and its mail goes to the pending queue.
//!
//! The set of identifiers seen since start-up only grows through
//! successful registrations, never through routing.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use otp_core::wire::{self, DataFrame};
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::config::{QueueConfig, RelayConfig, UnknownRecipientPolicy};
use crate::pending::{EnqueueOutcome, PendingEnvelope, PendingQueue};
use crate::registry::{PeerHandle, PeerRegistry, RegisterError, validate_identifier};

/// What happened to a routed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the recipient's live connection.
    Delivered,
    /// Stored until the recipient registers.
    Queued,
    /// The recipient's queue was full and the payload was dropped.
    QueueFull,
    /// The recipient has never registered and the payload was dropped.
    UnknownRecipient,
}

impl RouteOutcome {
    /// The line to send back to the sender, if any.
    #[must_use]
    pub fn reply(self, recipient: &str) -> Option<String> {
        match self {
            Self::Delivered | Self::Queued => None,
            Self::QueueFull => Some(wire::reply_queue_full(recipient)),
            Self::UnknownRecipient => Some(wire::reply_recipient_not_found(recipient)),
        }
    }
}

#[derive(Debug)]
struct BrokerState {
    registry: PeerRegistry,
    pending: PendingQueue,
    known: HashSet<String>,
}

/// Shared relay state.
#[derive(Debug)]
pub struct Broker {
    state: Mutex<BrokerState>,
    unknown_recipient: UnknownRecipientPolicy,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(QueueConfig::default(), UnknownRecipientPolicy::default())
    }
}

impl Broker {
    /// Creates a broker with no peers and empty queues.
    #[must_use]
    pub fn new(queue: QueueConfig, unknown_recipient: UnknownRecipientPolicy) -> Self {
        Self {
            state: Mutex::new(BrokerState {
                registry: PeerRegistry::new(),
                pending: PendingQueue::new(queue),
                known: HashSet::new(),
            }),
            unknown_recipient,
        }
    }

    /// Creates a broker with the policies of `config`.
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.queue.clone(), config.unknown_recipient)
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers the connection behind `handle` under the identifier in `raw`.
    ///
    /// On success the outbox has already received `Connected successfully.`
    /// followed by every envelope queued for the identifier, oldest first,
    /// as a single write. This happens under the same lock as the registry
    /// insert, so a concurrent forward to the new peer always lands behind
    /// queued mail.
    ///
    /// Returns the trimmed identifier.
    ///
    /// # Errors
    ///
    /// [`RegisterError::Invalid`], [`RegisterError::AlreadyTaken`], or
    /// [`RegisterError::Transport`] if the outbox no longer accepts writes,
    /// in which case the registration and any drained mail are rolled back.
    pub fn register(&self, raw: &str, handle: PeerHandle) -> Result<String, RegisterError> {
        let id = validate_identifier(raw)?;
        let conn = handle.conn();

        let mut state = self.lock();
        state.registry.register(id, handle.clone())?;
        state.known.insert(id.to_owned());

        let backlog = state.pending.drain(id);
        let delivered = backlog.len();
        let mut greeting = wire::REPLY_CONNECTED.to_owned();
        for envelope in &backlog {
            greeting.push('\n');
            greeting.push_str(&envelope.to_frame());
        }
        if handle.send(greeting).is_err() {
            state.pending.requeue_front(id, backlog);
            state.registry.unregister_connection(id, conn);
            return Err(RegisterError::Transport);
        }
        drop(state);

        if delivered > 0 {
            info!("'{id}' registered, flushed {delivered} queued message(s)");
        } else {
            info!("'{id}' registered");
        }
        Ok(id.to_owned())
    }

    /// Routes `payload` from `sender` to `recipient`.
    ///
    /// A live recipient gets `sender|payload` directly. If its connection has
    /// gone away, or its outbox is full because it stopped reading, it is
    /// unregistered and the payload is queued instead; a full peer is also
    /// told to disconnect. An absent recipient is queued, unless it has never
    /// registered and the broker rejects unknown recipients.
    pub fn route(&self, sender: &str, recipient: &str, payload: &str) -> RouteOutcome {
        let mut state = self.lock();

        if let Some(handle) = state.registry.lookup(recipient) {
            let conn = handle.conn();
            match handle.send(DataFrame::render(sender, payload)) {
                Ok(()) => {
                    debug!("'{sender}' -> '{recipient}': delivered");
                    return RouteOutcome::Delivered;
                }
                Err(TrySendError::Full(_)) => {
                    warn!("'{recipient}' is not reading its connection, disconnecting and queueing");
                    handle.disconnect();
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("'{recipient}' connection lost during forward, queueing instead");
                }
            }
            state.registry.unregister_connection(recipient, conn);
        } else if self.unknown_recipient == UnknownRecipientPolicy::Reject
            && !state.known.contains(recipient)
        {
            info!("'{sender}' -> '{recipient}': recipient unknown, dropped");
            return RouteOutcome::UnknownRecipient;
        }

        match state
            .pending
            .enqueue(recipient, PendingEnvelope::new(sender, payload))
        {
            EnqueueOutcome::Queued => {
                debug!("'{sender}' -> '{recipient}': queued");
                RouteOutcome::Queued
            }
            EnqueueOutcome::DroppedOldest(evicted) => {
                warn!(
                    "'{sender}' -> '{recipient}': queue full, evicted oldest message from '{}'",
                    evicted.sender
                );
                RouteOutcome::Queued
            }
            EnqueueOutcome::Rejected(_) => {
                warn!("'{sender}' -> '{recipient}': queue full, rejected");
                RouteOutcome::QueueFull
            }
        }
    }

    /// Releases `id` if connection `conn` still holds it.
    pub fn unregister_connection(&self, id: &str, conn: Uuid) -> bool {
        let removed = self.lock().registry.unregister_connection(id, conn);
        if removed {
            info!("'{id}' unregistered");
        }
        removed
    }

    /// Whether `id` currently has a live connection.
    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.lock().registry.lookup(id).is_some()
    }

    /// Envelopes waiting for `id`.
    #[must_use]
    pub fn pending_len(&self, id: &str) -> usize {
        self.lock().pending.len(id)
    }

    /// Number of live peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.lock().registry.len()
    }
}
