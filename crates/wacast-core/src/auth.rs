// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Auth record categories and blob encoding.
//!
//! Blobs are JSON values. Binary fields are wrapped as
//! `{"type":"Buffer","data":"<base64>"}` so they survive the round trip
//! through a text column unchanged.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumIter, EnumString};

/// Item id under which the credentials blob is stored.
pub const CREDS_ITEM_ID: &str = "creds";

/// Kind of key material held for a device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AuthCategory {
    Creds,
    PreKeys,
    Sessions,
    SenderKeys,
    AppStateSyncKeys,
    AppStateVersions,
    SenderKeyMemory,
}

/// An opaque auth value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthBlob(pub Value);

impl AuthBlob {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw).map(AuthBlob)
    }

    pub fn to_json(&self) -> String {
        self.0.to_string()
    }

    /// Wraps raw bytes in the byte-preserving encoding.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        AuthBlob(encode_buffer(bytes))
    }

    /// Recovers raw bytes if this blob is a single encoded buffer.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        decode_buffer(&self.0)
    }
}

/// `{"type":"Buffer","data":"<base64>"}` for `bytes`.
pub fn encode_buffer(bytes: &[u8]) -> Value {
    let mut obj = Map::new();
    obj.insert("type".into(), Value::String("Buffer".into()));
    obj.insert("data".into(), Value::String(STANDARD.encode(bytes)));
    Value::Object(obj)
}

/// Inverse of [`encode_buffer`]; `None` for any other shape.
pub fn decode_buffer(value: &Value) -> Option<Vec<u8>> {
    let obj = value.as_object()?;
    if obj.get("type")?.as_str()? != "Buffer" {
        return None;
    }
    STANDARD.decode(obj.get("data")?.as_str()?).ok()
}

/// Whether a creds blob carries a registered identity (`me.id`).
///
/// Credentials without one never completed pairing and cannot resume a
/// session.
pub fn creds_are_valid(creds: Option<&AuthBlob>) -> bool {
    creds
        .and_then(|c| c.0.get("me"))
        .and_then(|me| me.get("id"))
        .and_then(Value::as_str)
        .is_some_and(|id| !id.trim().is_empty())
}
