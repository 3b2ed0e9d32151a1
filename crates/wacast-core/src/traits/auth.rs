// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable store for per-device credentials and key material.

use async_trait::async_trait;

use crate::auth::{AuthBlob, AuthCategory};
use crate::error::WacastError;

/// One item of a batched key write. `value: None` deletes the item.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyWrite {
    pub category: AuthCategory,
    pub item_id: String,
    pub value: Option<AuthBlob>,
}

/// A device the store knows about, with its display label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RememberedDevice {
    pub device_id: String,
    pub connection_name: Option<String>,
}

/// Auth records keyed by `(device_id, category, item_id)`.
///
/// Implementations must allow concurrent reads of different items and must
/// never let a write to one key disturb another.
#[async_trait]
pub trait AuthStateStore: Send + Sync {
    async fn read(
        &self,
        device_id: &str,
        category: AuthCategory,
        item_id: &str,
    ) -> Result<Option<AuthBlob>, WacastError>;

    async fn write(
        &self,
        device_id: &str,
        category: AuthCategory,
        item_id: &str,
        blob: &AuthBlob,
    ) -> Result<(), WacastError>;

    /// Applies a batch atomically.
    async fn write_batch(&self, device_id: &str, writes: Vec<KeyWrite>)
    -> Result<(), WacastError>;

    /// Deletes every record for `device_id` and forgets the device.
    /// Returns the number of auth records removed.
    async fn wipe(&self, device_id: &str) -> Result<u64, WacastError>;

    /// Records a device and its label so it can be restored after a restart.
    async fn remember_device(
        &self,
        device_id: &str,
        connection_name: Option<&str>,
    ) -> Result<(), WacastError>;

    async fn remembered_devices(&self) -> Result<Vec<RememberedDevice>, WacastError>;

    /// Every device id that owns at least one auth record.
    async fn devices_with_records(&self) -> Result<Vec<String>, WacastError>;
}
