// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the wacast campaign sender.

use std::time::Duration;

use thiserror::Error;

/// The primary error type used across adapter traits and core operations.
#[derive(Debug, Error)]
pub enum WacastError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Protocol transport errors (socket failure, sidecar rejection, bad frame).
    #[error("transport error: {message}")]
    Transport {
        message: String,
        /// Protocol-level status code, when the transport reported one.
        status: Option<u16>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The device has no live, connected session.
    #[error("device not connected: {device_id}")]
    DeviceNotConnected { device_id: String },

    /// A referenced row or registry entry does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A state transition was requested that the current state forbids.
    #[error("invalid transition for {entity} {id}: {detail}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        detail: String,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WacastError {
    /// Shorthand for a transport error without a status code or source.
    pub fn transport(message: impl Into<String>) -> Self {
        WacastError::Transport {
            message: message.into(),
            status: None,
            source: None,
        }
    }
}

/// Failure of a single guarded send.
///
/// Cloneable because one in-flight result is handed to every caller that
/// joined the same send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("device not connected")]
    DeviceNotConnected,

    /// The transport reports no account behind the address.
    #[error("number does not exist on WhatsApp: {recipient}")]
    InvalidRecipient { recipient: String },

    /// The same recipient was sent to successfully moments ago.
    #[error("send to {recipient} rejected: too frequent")]
    TooFrequent {
        recipient: String,
        /// Time left in the dedup window.
        retry_after: Duration,
    },

    #[error("transport error: {message}")]
    Transport { message: String, status: Option<u16> },

    /// The leading send was dropped before it produced a result.
    #[error("send abandoned before completion")]
    Abandoned,
}

impl SendError {
    /// Whether a failed attempt may be retried.
    ///
    /// Transport failures without a status, server errors and rate limiting
    /// retry, and so does a dedup-window rejection once the window has
    /// passed. Other client errors and the remaining guard rejections are
    /// final.
    pub fn is_retryable(&self) -> bool {
        match self {
            SendError::Transport { status: None, .. } | SendError::TooFrequent { .. } => true,
            SendError::Transport {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            SendError::DeviceNotConnected
            | SendError::InvalidRecipient { .. }
            | SendError::Abandoned => false,
        }
    }

    /// Minimum wait before a retry can succeed, when the failure says so.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SendError::TooFrequent { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<WacastError> for SendError {
    fn from(err: WacastError) -> Self {
        match err {
            WacastError::DeviceNotConnected { .. } => SendError::DeviceNotConnected,
            WacastError::Transport {
                message, status, ..
            } => SendError::Transport { message, status },
            other => SendError::Transport {
                message: other.to_string(),
                status: None,
            },
        }
    }
}
