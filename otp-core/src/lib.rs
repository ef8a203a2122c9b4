// File:    lib.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: The main library crate for otp-core, orchestrating pad allocation, the XOR codec and the relay wire format.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

//! # OTP Core Library
//!
//! This library provides the pieces shared by one-time-pad peers and the
//! relay between them: exactly-once pad page allocation, the XOR codec,
//! and the line-oriented wire protocol.

/// The XOR transform and the monotonic pad cursor used for audio chunks.
pub mod codec;
/// Error types for every module of this crate.
pub mod error;
/// Sealing and opening of text messages and audio chunks on a client.
pub mod messaging;
/// Utilities for generating new pad files.
pub mod pad_generator;
/// Loading pad pages and allocating each one at most once.
pub mod pad_store;
/// Framing, relay replies and ciphertext payloads.
pub mod wire;

pub use error::{CodecError, MessagingError, PadError, WireError};
pub use pad_store::{PadPage, PadPaths, PadStatus, PadStore, PageId};
pub use wire::CipherPayload;
