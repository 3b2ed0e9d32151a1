// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the storage, auth-state and campaign traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::debug;

use wacast_config::model::StorageConfig;
use wacast_core::traits::{KeyWrite, RememberedDevice};
use wacast_core::types::{
    Campaign, CampaignStatus, Contact, JobOutcome, NewCampaign, NewSendJob, RecipientList,
    SendJob,
};
use wacast_core::{
    AdapterType, AuthBlob, AuthCategory, AuthStateStore, CampaignStore, HealthStatus,
    PluginAdapter, StorageAdapter, WacastError,
};

use crate::database::Database;
use crate::queries;

/// SQLite-backed storage. The connection opens on [`StorageAdapter::initialize`].
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    fn db(&self) -> Result<&Database, WacastError> {
        self.db.get().ok_or_else(|| WacastError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, WacastError> {
        let Ok(db) = self.db() else {
            return Ok(HealthStatus::Unhealthy("not initialized".into()));
        };
        match db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
        {
            Ok(()) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }

    async fn shutdown(&self) -> Result<(), WacastError> {
        if let Some(db) = self.db.get() {
            db.checkpoint().await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), WacastError> {
        let db = Database::open_with(&self.config.database_path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| WacastError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), WacastError> {
        self.db()?.checkpoint().await
    }
}

#[async_trait]
impl AuthStateStore for SqliteStorage {
    async fn read(
        &self,
        device_id: &str,
        category: AuthCategory,
        item_id: &str,
    ) -> Result<Option<AuthBlob>, WacastError> {
        queries::auth::read(self.db()?, device_id, category, item_id).await
    }

    async fn write(
        &self,
        device_id: &str,
        category: AuthCategory,
        item_id: &str,
        blob: &AuthBlob,
    ) -> Result<(), WacastError> {
        queries::auth::write(self.db()?, device_id, category, item_id, blob).await
    }

    async fn write_batch(
        &self,
        device_id: &str,
        writes: Vec<KeyWrite>,
    ) -> Result<(), WacastError> {
        queries::auth::write_batch(self.db()?, device_id, writes).await
    }

    async fn wipe(&self, device_id: &str) -> Result<u64, WacastError> {
        queries::auth::wipe(self.db()?, device_id).await
    }

    async fn remember_device(
        &self,
        device_id: &str,
        connection_name: Option<&str>,
    ) -> Result<(), WacastError> {
        queries::auth::remember_device(self.db()?, device_id, connection_name).await
    }

    async fn remembered_devices(&self) -> Result<Vec<RememberedDevice>, WacastError> {
        queries::auth::remembered_devices(self.db()?).await
    }

    async fn devices_with_records(&self) -> Result<Vec<String>, WacastError> {
        queries::auth::devices_with_records(self.db()?).await
    }
}

#[async_trait]
impl CampaignStore for SqliteStorage {
    async fn create_recipient_list(
        &self,
        name: &str,
        contacts: &[Contact],
    ) -> Result<RecipientList, WacastError> {
        queries::campaigns::create_recipient_list(self.db()?, name, contacts).await
    }

    async fn get_recipient_list(&self, id: &str) -> Result<Option<RecipientList>, WacastError> {
        queries::campaigns::get_recipient_list(self.db()?, id).await
    }

    async fn create_campaign(&self, campaign: NewCampaign) -> Result<Campaign, WacastError> {
        queries::campaigns::create_campaign(self.db()?, campaign).await
    }

    async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>, WacastError> {
        queries::campaigns::get_campaign(self.db()?, id).await
    }

    async fn due_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, WacastError> {
        queries::campaigns::due_campaigns(self.db()?, now).await
    }

    async fn claim_campaign(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, WacastError> {
        queries::campaigns::claim_campaign(self.db()?, id, now, lease_until).await
    }

    async fn renew_lease(&self, id: &str, lease_until: DateTime<Utc>) -> Result<(), WacastError> {
        queries::campaigns::renew_lease(self.db()?, id, lease_until).await
    }

    async fn list_jobs(&self, campaign_id: &str) -> Result<Vec<SendJob>, WacastError> {
        queries::send_jobs::list_jobs(self.db()?, campaign_id).await
    }

    async fn create_jobs(
        &self,
        campaign_id: &str,
        jobs: &[NewSendJob],
    ) -> Result<Vec<SendJob>, WacastError> {
        queries::send_jobs::create_jobs(self.db()?, campaign_id, jobs).await
    }

    async fn complete_job(&self, job_id: i64, outcome: &JobOutcome) -> Result<bool, WacastError> {
        queries::send_jobs::complete_job(self.db()?, job_id, outcome).await
    }

    async fn finish_campaign(
        &self,
        id: &str,
        status: CampaignStatus,
    ) -> Result<bool, WacastError> {
        queries::campaigns::finish_campaign(self.db()?, id, status).await
    }

    async fn pause_campaign(&self, id: &str) -> Result<bool, WacastError> {
        queries::campaigns::pause_campaign(self.db()?, id).await
    }

    async fn resume_campaign(&self, id: &str) -> Result<bool, WacastError> {
        queries::campaigns::resume_campaign(self.db()?, id).await
    }
}
