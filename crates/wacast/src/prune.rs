// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `wacast prune-auth`: removes auth state left behind by pairings that
//! never completed.
//!
//! Runs against the database directly, so it does not know which devices
//! a running server is pairing right now. Run it while `serve` is stopped.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use wacast_config::WacastConfig;
use wacast_core::{StorageAdapter, WacastError};
use wacast_session::AuthState;
use wacast_storage::SqliteStorage;

/// Returns the affected device ids. With `dry_run` nothing is deleted.
pub async fn run_prune_auth(
    config: &WacastConfig,
    dry_run: bool,
) -> Result<Vec<String>, WacastError> {
    let storage = Arc::new(SqliteStorage::new(config.storage.clone()));
    storage.initialize().await?;

    let auth = AuthState::new(storage.clone());
    let mut pruned = auth.prune_invalid(&HashSet::new(), dry_run).await?;
    pruned.sort();
    storage.close().await?;

    info!(count = pruned.len(), dry_run, "auth prune finished");
    Ok(pruned)
}

pub fn report(pruned: &[String], dry_run: bool) {
    let verb = if dry_run { "would remove" } else { "removed" };
    if pruned.is_empty() {
        println!("no unlinked auth state found");
        return;
    }
    for device_id in pruned {
        println!("{verb}: {device_id}");
    }
    println!("{} device(s)", pruned.len());
}
