// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage adapter lifecycle.

use async_trait::async_trait;

use crate::error::WacastError;
use crate::traits::adapter::PluginAdapter;

/// Lifecycle of a persistence backend.
#[async_trait]
pub trait StorageAdapter: PluginAdapter {
    /// Opens the backend and applies pending migrations.
    async fn initialize(&self) -> Result<(), WacastError>;

    /// Flushes pending writes and releases the connection.
    async fn close(&self) -> Result<(), WacastError>;
}
