// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Auth-state access for live sessions.
//!
//! Reads never fail from the protocol client's point of view: a storage
//! error is logged and the record is reported absent, which makes the
//! client regenerate what it needs. Writes propagate so the transport only
//! considers credentials persisted once they are.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};
use wacast_core::auth::{CREDS_ITEM_ID, creds_are_valid};
use wacast_core::traits::KeyWrite;
use wacast_core::{AuthBlob, AuthCategory, AuthStateStore, KeyStore, WacastError};

#[derive(Clone)]
pub struct AuthState {
    store: Arc<dyn AuthStateStore>,
}

impl AuthState {
    pub fn new(store: Arc<dyn AuthStateStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn AuthStateStore> {
        &self.store
    }

    pub async fn read(
        &self,
        device_id: &str,
        category: AuthCategory,
        item_id: &str,
    ) -> Option<AuthBlob> {
        match self.store.read(device_id, category, item_id).await {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    device_id,
                    %category,
                    item_id,
                    error = %e,
                    "auth record read failed, treating as absent"
                );
                None
            }
        }
    }

    pub async fn load_creds(&self, device_id: &str) -> Option<AuthBlob> {
        self.read(device_id, AuthCategory::Creds, CREDS_ITEM_ID).await
    }

    pub async fn save_creds(&self, device_id: &str, creds: &AuthBlob) -> Result<(), WacastError> {
        self.store
            .write(device_id, AuthCategory::Creds, CREDS_ITEM_ID, creds)
            .await
    }

    /// Whether stored credentials identify a linked account.
    pub async fn creds_valid(&self, device_id: &str) -> bool {
        creds_are_valid(self.load_creds(device_id).await.as_ref())
    }

    pub async fn wipe(&self, device_id: &str) -> Result<u64, WacastError> {
        let removed = self.store.wipe(device_id).await?;
        info!(device_id, removed, "auth state wiped");
        Ok(removed)
    }

    /// Key store handle scoped to one device, handed to the transport.
    pub fn keys_for(&self, device_id: &str) -> Arc<dyn KeyStore> {
        Arc::new(DeviceKeys {
            auth: self.clone(),
            device_id: device_id.to_string(),
        })
    }

    /// Wipes every device whose stored credentials never completed
    /// pairing, except those listed in `skip`.
    ///
    /// Returns the affected device ids; with `dry_run` nothing is deleted.
    pub async fn prune_invalid(
        &self,
        skip: &HashSet<String>,
        dry_run: bool,
    ) -> Result<Vec<String>, WacastError> {
        let mut pruned = Vec::new();
        for device_id in self.store.devices_with_records().await? {
            if skip.contains(&device_id) || self.creds_valid(&device_id).await {
                continue;
            }
            if dry_run {
                debug!(device_id = %device_id, "would prune auth state");
            } else {
                self.wipe(&device_id).await?;
            }
            pruned.push(device_id);
        }
        Ok(pruned)
    }
}

struct DeviceKeys {
    auth: AuthState,
    device_id: String,
}

#[async_trait]
impl KeyStore for DeviceKeys {
    async fn get(&self, category: AuthCategory, ids: &[String]) -> HashMap<String, AuthBlob> {
        let reads = ids.iter().map(|id| async move {
            let value = self.auth.read(&self.device_id, category, id).await;
            (id.clone(), value)
        });
        join_all(reads)
            .await
            .into_iter()
            .filter_map(|(id, value)| value.map(|v| (id, v)))
            .collect()
    }

    async fn set(&self, writes: Vec<KeyWrite>) -> Result<(), WacastError> {
        self.auth.store.write_batch(&self.device_id, writes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wacast_test_utils::MemoryStore;

    fn linked() -> AuthBlob {
        AuthBlob(json!({"me": {"id": "5511999990000:3@s.whatsapp.net"}}))
    }

    #[tokio::test]
    async fn key_store_returns_only_present_ids() {
        let store = Arc::new(MemoryStore::new());
        let auth = AuthState::new(store.clone());
        let keys = auth.keys_for("dev1");
        keys.set(vec![
            KeyWrite {
                category: AuthCategory::PreKeys,
                item_id: "1".into(),
                value: Some(AuthBlob(json!("a"))),
            },
            KeyWrite {
                category: AuthCategory::PreKeys,
                item_id: "2".into(),
                value: Some(AuthBlob(json!("b"))),
            },
        ])
        .await
        .unwrap();

        let got = keys
            .get(AuthCategory::PreKeys, &["1".into(), "3".into()])
            .await;
        assert_eq!(got.len(), 1);
        assert_eq!(got["1"], AuthBlob(json!("a")));
    }

    #[tokio::test]
    async fn null_write_deletes() {
        let store = Arc::new(MemoryStore::new());
        let auth = AuthState::new(store.clone());
        let keys = auth.keys_for("dev1");
        let write = |value| KeyWrite {
            category: AuthCategory::Sessions,
            item_id: "s".into(),
            value,
        };
        keys.set(vec![write(Some(AuthBlob(json!(1))))]).await.unwrap();
        keys.set(vec![write(None)]).await.unwrap();
        assert!(keys.get(AuthCategory::Sessions, &["s".into()]).await.is_empty());
    }

    #[tokio::test]
    async fn read_failure_is_absent() {
        let store = Arc::new(MemoryStore::new());
        store.fail_reads(true);
        let auth = AuthState::new(store.clone());
        assert!(auth.load_creds("dev1").await.is_none());
        assert!(!auth.creds_valid("dev1").await);
    }

    #[tokio::test]
    async fn creds_round_trip_and_validity() {
        let store = Arc::new(MemoryStore::new());
        let auth = AuthState::new(store);
        assert!(!auth.creds_valid("dev1").await);
        auth.save_creds("dev1", &linked()).await.unwrap();
        assert!(auth.creds_valid("dev1").await);
        assert_eq!(auth.load_creds("dev1").await, Some(linked()));
    }

    #[tokio::test]
    async fn prune_skips_linked_and_live_devices() {
        let store = Arc::new(MemoryStore::new());
        let auth = AuthState::new(store.clone());
        auth.save_creds("linked", &linked()).await.unwrap();
        auth.save_creds("half", &AuthBlob(json!({"noiseKey": {}})))
            .await
            .unwrap();
        auth.save_creds("pairing", &AuthBlob(json!({}))).await.unwrap();

        let skip: HashSet<String> = ["pairing".to_string()].into();
        let dry = auth.prune_invalid(&skip, true).await.unwrap();
        assert_eq!(dry, vec!["half".to_string()]);
        assert!(auth.load_creds("half").await.is_some());

        let pruned = auth.prune_invalid(&skip, false).await.unwrap();
        assert_eq!(pruned, vec!["half".to_string()]);
        assert!(auth.load_creds("half").await.is_none());
        assert!(auth.load_creds("linked").await.is_some());
        assert!(auth.load_creds("pairing").await.is_some());
    }
}
