// File:    pending.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: Per-recipient FIFO queues of envelopes awaiting an offline peer.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

use std::collections::{HashMap, VecDeque};

use otp_core::wire::DataFrame;

use crate::config::{OverflowPolicy, QueueConfig};

/// A payload held for an offline recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEnvelope {
    /// Who sent it.
    pub sender: String,
    /// The opaque payload, exactly as received.
    pub payload: String,
}

impl PendingEnvelope {
    /// Creates an envelope.
    pub fn new(sender: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            payload: payload.into(),
        }
    }

    /// The `sender|payload` line delivered to the recipient.
    #[must_use]
    pub fn to_frame(&self) -> String {
        DataFrame::render(&self.sender, &self.payload)
    }
}

/// Result of [`PendingQueue::enqueue`].
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended without loss.
    Queued,
    /// Appended after evicting the oldest envelope, which is returned.
    DroppedOldest(PendingEnvelope),
    /// The queue was full and the envelope, returned, was not stored.
    Rejected(PendingEnvelope),
}

/// Ordered mail for recipients without a live connection.
#[derive(Debug)]
pub struct PendingQueue {
    queues: HashMap<String, VecDeque<PendingEnvelope>>,
    total: usize,
    limits: QueueConfig,
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl PendingQueue {
    /// Creates empty queues bounded by `limits`.
    #[must_use]
    pub fn new(limits: QueueConfig) -> Self {
        Self {
            queues: HashMap::new(),
            total: 0,
            limits,
        }
    }

    /// Creates empty queues with no size limit.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(QueueConfig {
            max_per_recipient: 0,
            overflow: OverflowPolicy::DropOldest,
            max_total: 0,
        })
    }

    /// Appends an envelope to `recipient`'s queue, creating it if absent.
    ///
    /// A full recipient queue follows the overflow policy. Below that bound,
    /// an envelope that would exceed the global bound is rejected.
    pub fn enqueue(&mut self, recipient: &str, envelope: PendingEnvelope) -> EnqueueOutcome {
        let max = self.limits.max_per_recipient;
        let held = self.len(recipient);
        if max == 0 || held < max {
            let max_total = self.limits.max_total;
            if max_total != 0 && self.total >= max_total {
                return EnqueueOutcome::Rejected(envelope);
            }
            self.queues
                .entry(recipient.to_owned())
                .or_default()
                .push_back(envelope);
            self.total += 1;
            return EnqueueOutcome::Queued;
        }
        let queue = self.queues.entry(recipient.to_owned()).or_default();
        match self.limits.overflow {
            OverflowPolicy::RejectNew => EnqueueOutcome::Rejected(envelope),
            OverflowPolicy::DropOldest => {
                let evicted = queue.pop_front();
                queue.push_back(envelope);
                match evicted {
                    Some(evicted) => EnqueueOutcome::DroppedOldest(evicted),
                    None => {
                        self.total += 1;
                        EnqueueOutcome::Queued
                    }
                }
            }
        }
    }

    /// Removes and returns everything queued for `recipient`, oldest first.
    pub fn drain(&mut self, recipient: &str) -> Vec<PendingEnvelope> {
        let drained = self
            .queues
            .remove(recipient)
            .map(Vec::from)
            .unwrap_or_default();
        self.total -= drained.len();
        drained
    }

    /// Puts undelivered envelopes back at the head of `recipient`'s queue,
    /// ahead of anything queued since, preserving their order.
    pub fn requeue_front(&mut self, recipient: &str, envelopes: Vec<PendingEnvelope>) {
        if envelopes.is_empty() {
            return;
        }
        self.total += envelopes.len();
        let queue = self.queues.entry(recipient.to_owned()).or_default();
        for envelope in envelopes.into_iter().rev() {
            queue.push_front(envelope);
        }
    }

    /// Envelopes waiting for `recipient`.
    #[must_use]
    pub fn len(&self, recipient: &str) -> usize {
        self.queues.get(recipient).map_or(0, VecDeque::len)
    }

    /// Envelopes waiting across all recipients.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }
}
