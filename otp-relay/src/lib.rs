// File:    lib.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: The otp-relay library: a store-and-forward broker for identified peers.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

//! # OTP Relay
//!
//! Peers connect, register a self-chosen identifier and exchange
//! `recipient|payload` lines. Payloads are forwarded untouched; mail for an
//! offline peer waits in a bounded queue until it registers again.

/// The shared broker state and its routing rules.
pub mod broker;
/// A client for the relay's line protocol.
pub mod client;
/// Relay configuration.
pub mod config;
/// The per-connection state machine.
pub mod connection;
/// Store-and-forward queues.
pub mod pending;
/// Live peer identifiers.
pub mod registry;
/// The accept loop.
pub mod server;

pub use broker::{Broker, RouteOutcome};
pub use client::{ClientError, Inbound, RelayClient};
pub use config::{OverflowPolicy, QueueConfig, RelayConfig, UnknownRecipientPolicy};
pub use server::RelayServer;
