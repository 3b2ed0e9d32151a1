// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JSON frames exchanged with the protocol sidecar.
//!
//! Every frame is a text message holding one object tagged by `"type"`.
//! Requests that need an answer carry a `request_id`, echoed in the reply.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use wacast_core::AuthCategory;

/// Frames sent to the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToSidecar {
    /// Starts the protocol client; `creds` is absent for a fresh pairing.
    Start {
        #[serde(skip_serializing_if = "Option::is_none")]
        creds: Option<Value>,
    },
    KeysResult {
        request_id: String,
        values: HashMap<String, Value>,
    },
    /// Answer to `creds_update` and `keys_set` once the write is durable.
    Ack {
        request_id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Send {
        request_id: String,
        jid: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },
    Lookup {
        request_id: String,
        jid: String,
    },
    Logout {
        request_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// Frames received from the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FromSidecar {
    Qr {
        qr: String,
    },
    PairingCode {
        code: String,
    },
    Connection {
        state: ConnectionState,
        #[serde(default)]
        status_code: Option<u16>,
    },
    CredsUpdate {
        request_id: String,
        creds: Value,
    },
    KeysGet {
        request_id: String,
        category: String,
        ids: Vec<String>,
    },
    /// `data[category][id]`; a null value deletes the key.
    KeysSet {
        request_id: String,
        data: HashMap<String, HashMap<String, Option<Value>>>,
    },
    Message {
        from: String,
        id: String,
        #[serde(default)]
        text: Option<String>,
    },
    SendResult {
        request_id: String,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        status_code: Option<u16>,
    },
    LookupResult {
        request_id: String,
        /// Canonical address when the number has an account.
        #[serde(default)]
        jid: Option<String>,
    },
    LogoutResult {
        request_id: String,
        #[serde(default)]
        error: Option<String>,
    },
}

impl FromSidecar {
    /// Request id of a reply to one of our requests.
    pub fn reply_id(&self) -> Option<&str> {
        match self {
            FromSidecar::SendResult { request_id, .. }
            | FromSidecar::LookupResult { request_id, .. }
            | FromSidecar::LogoutResult { request_id, .. } => Some(request_id),
            _ => None,
        }
    }
}

/// Sidecar name of a signal key category. Credentials are not a key
/// category on the wire.
pub fn category_to_wire(category: AuthCategory) -> Option<&'static str> {
    Some(match category {
        AuthCategory::Creds => return None,
        AuthCategory::PreKeys => "pre-key",
        AuthCategory::Sessions => "session",
        AuthCategory::SenderKeys => "sender-key",
        AuthCategory::AppStateSyncKeys => "app-state-sync-key",
        AuthCategory::AppStateVersions => "app-state-sync-version",
        AuthCategory::SenderKeyMemory => "sender-key-memory",
    })
}

pub fn category_from_wire(name: &str) -> Option<AuthCategory> {
    Some(match name {
        "pre-key" => AuthCategory::PreKeys,
        "session" => AuthCategory::Sessions,
        "sender-key" => AuthCategory::SenderKeys,
        "app-state-sync-key" => AuthCategory::AppStateSyncKeys,
        "app-state-sync-version" => AuthCategory::AppStateVersions,
        "sender-key-memory" => AuthCategory::SenderKeyMemory,
        _ => return None,
    })
}
