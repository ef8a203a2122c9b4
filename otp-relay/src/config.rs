// File:    config.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: Relay configuration loaded from an optional TOML file, with defaults for every field.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// The port the relay has always listened on.
pub const DEFAULT_PORT: u16 = 65432;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// The file that was being read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`RelayConfig`].
    #[error("invalid config file {path}: {source}")]
    Parse {
        /// The file that was being parsed.
        path: String,
        /// The underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}

/// What to do with a new envelope when the recipient's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued envelope to make room.
    #[default]
    DropOldest,
    /// Refuse the new envelope and tell the sender.
    RejectNew,
}

/// How to treat mail for an identifier that has never registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownRecipientPolicy {
    /// Reply `Recipient '<id>' not found.` and drop the payload.
    #[default]
    Reject,
    /// Queue it as if the recipient were merely offline.
    Queue,
}

/// Bounds on the store-and-forward queues.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Envelopes held per offline recipient. Zero means unbounded.
    #[serde(default = "default_max_per_recipient")]
    pub max_per_recipient: usize,

    /// Behaviour once `max_per_recipient` is reached.
    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Envelopes held across all recipients. Zero means unbounded. Once
    /// reached, new envelopes are refused whatever `overflow` says.
    #[serde(default = "default_max_total")]
    pub max_total: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_per_recipient: default_max_per_recipient(),
            overflow: OverflowPolicy::default(),
            max_total: default_max_total(),
        }
    }
}

/// Relay configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// IP address to bind on (default "0.0.0.0").
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port for peer connections.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds a connection may stay unidentified before it is closed.
    #[serde(default = "default_registration_timeout_secs")]
    pub registration_timeout_secs: u64,

    /// Longest accepted frame in bytes, terminator excluded.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,

    /// Maximum concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Writes buffered for one live peer before it counts as not reading
    /// and is disconnected. Values below 1 are treated as 1.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,

    /// Mail for never-registered identifiers.
    #[serde(default)]
    pub unknown_recipient: UnknownRecipientPolicy,

    /// Pending queue limits.
    #[serde(default)]
    pub queue: QueueConfig,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_registration_timeout_secs() -> u64 {
    30
}

const fn default_max_frame_len() -> usize {
    otp_core::wire::MAX_FRAME_LEN
}

const fn default_max_connections() -> usize {
    256
}

const fn default_outbox_capacity() -> usize {
    256
}

const fn default_max_per_recipient() -> usize {
    1024
}

const fn default_max_total() -> usize {
    65536
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            registration_timeout_secs: default_registration_timeout_secs(),
            max_frame_len: default_max_frame_len(),
            max_connections: default_max_connections(),
            outbox_capacity: default_outbox_capacity(),
            unknown_recipient: UnknownRecipientPolicy::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Reads a configuration file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// The `host:port` string to bind.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// [`Self::registration_timeout_secs`] as a duration.
    #[must_use]
    pub const fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }
}
