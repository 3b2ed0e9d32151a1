// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory store with the same conditional-update rules as the SQLite
//! store, plus failure injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use wacast_core::traits::{KeyWrite, RememberedDevice};
use wacast_core::types::{
    Campaign, CampaignStatus, Contact, JobOutcome, JobStatus, NewCampaign, NewSendJob,
    RecipientList, SendJob,
};
use wacast_core::{AuthBlob, AuthCategory, AuthStateStore, CampaignStore, WacastError};

type AuthKey = (String, AuthCategory, String);

struct StoredCampaign {
    campaign: Campaign,
    locked_until: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct State {
    auth: BTreeMap<AuthKey, AuthBlob>,
    devices: BTreeMap<String, Option<String>>,
    lists: HashMap<String, RecipientList>,
    campaigns: BTreeMap<String, StoredCampaign>,
    jobs: Vec<SendJob>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    wipe_latency: Mutex<Duration>,
}

fn injected(op: &str) -> WacastError {
    WacastError::Storage {
        source: format!("injected {op} failure").into(),
    }
}

fn is_due(stored: &StoredCampaign, now: DateTime<Utc>) -> bool {
    match stored.campaign.status {
        CampaignStatus::Draft | CampaignStatus::Scheduled => stored.campaign.scheduled_at <= now,
        CampaignStatus::InProgress => stored.locked_until.is_none_or(|until| until <= now),
        _ => false,
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay applied to `wipe` before any record is removed.
    pub fn set_wipe_latency(&self, latency: Duration) {
        *self.wipe_latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    fn check_write(&self) -> Result<(), WacastError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected("write"));
        }
        Ok(())
    }

    /// Number of auth records held for a device.
    pub fn auth_record_count(&self, device_id: &str) -> usize {
        self.lock()
            .auth
            .keys()
            .filter(|(device, _, _)| device == device_id)
            .count()
    }

    /// Lease expiry of a campaign, for lease assertions.
    pub fn locked_until(&self, campaign_id: &str) -> Option<DateTime<Utc>> {
        self.lock()
            .campaigns
            .get(campaign_id)
            .and_then(|c| c.locked_until)
    }

    /// Forces a campaign's status, bypassing transition rules.
    pub fn set_status(&self, campaign_id: &str, status: CampaignStatus) {
        if let Some(c) = self.lock().campaigns.get_mut(campaign_id) {
            c.campaign.status = status;
        }
    }
}

#[async_trait]
impl AuthStateStore for MemoryStore {
    async fn read(
        &self,
        device_id: &str,
        category: AuthCategory,
        item_id: &str,
    ) -> Result<Option<AuthBlob>, WacastError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected("read"));
        }
        Ok(self
            .lock()
            .auth
            .get(&(device_id.to_string(), category, item_id.to_string()))
            .cloned())
    }

    async fn write(
        &self,
        device_id: &str,
        category: AuthCategory,
        item_id: &str,
        blob: &AuthBlob,
    ) -> Result<(), WacastError> {
        self.check_write()?;
        self.lock().auth.insert(
            (device_id.to_string(), category, item_id.to_string()),
            blob.clone(),
        );
        Ok(())
    }

    async fn write_batch(
        &self,
        device_id: &str,
        writes: Vec<KeyWrite>,
    ) -> Result<(), WacastError> {
        self.check_write()?;
        let mut state = self.lock();
        for write in writes {
            let key = (device_id.to_string(), write.category, write.item_id);
            match write.value {
                Some(value) => state.auth.insert(key, value),
                None => state.auth.remove(&key),
            };
        }
        Ok(())
    }

    async fn wipe(&self, device_id: &str) -> Result<u64, WacastError> {
        self.check_write()?;
        let latency = *self.wipe_latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.lock();
        let before = state.auth.len();
        state.auth.retain(|(device, _, _), _| device != device_id);
        state.devices.remove(device_id);
        Ok((before - state.auth.len()) as u64)
    }

    async fn remember_device(
        &self,
        device_id: &str,
        connection_name: Option<&str>,
    ) -> Result<(), WacastError> {
        self.check_write()?;
        let mut state = self.lock();
        let entry = state.devices.entry(device_id.to_string()).or_default();
        if let Some(name) = connection_name {
            *entry = Some(name.to_string());
        }
        Ok(())
    }

    async fn remembered_devices(&self) -> Result<Vec<RememberedDevice>, WacastError> {
        Ok(self
            .lock()
            .devices
            .iter()
            .map(|(id, name)| RememberedDevice {
                device_id: id.clone(),
                connection_name: name.clone(),
            })
            .collect())
    }

    async fn devices_with_records(&self) -> Result<Vec<String>, WacastError> {
        let state = self.lock();
        let mut ids: Vec<String> = state.auth.keys().map(|(d, _, _)| d.clone()).collect();
        ids.dedup();
        Ok(ids)
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn create_recipient_list(
        &self,
        name: &str,
        contacts: &[Contact],
    ) -> Result<RecipientList, WacastError> {
        self.check_write()?;
        let list = RecipientList {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            contacts: contacts.to_vec(),
        };
        self.lock().lists.insert(list.id.clone(), list.clone());
        Ok(list)
    }

    async fn get_recipient_list(&self, id: &str) -> Result<Option<RecipientList>, WacastError> {
        Ok(self.lock().lists.get(id).cloned())
    }

    async fn create_campaign(&self, new: NewCampaign) -> Result<Campaign, WacastError> {
        self.check_write()?;
        let campaign = Campaign {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: new.device_id,
            name: new.name,
            text: new.text,
            image_url: new.image_url,
            recipient_list_id: new.recipient_list_id,
            delay_seconds: new.delay_seconds,
            scheduled_at: new.scheduled_at,
            status: new.status,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.lock().campaigns.insert(
            campaign.id.clone(),
            StoredCampaign {
                campaign: campaign.clone(),
                locked_until: None,
            },
        );
        Ok(campaign)
    }

    async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>, WacastError> {
        Ok(self.lock().campaigns.get(id).map(|c| c.campaign.clone()))
    }

    async fn due_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, WacastError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected("read"));
        }
        let mut due: Vec<Campaign> = self
            .lock()
            .campaigns
            .values()
            .filter(|c| is_due(c, now))
            .map(|c| c.campaign.clone())
            .collect();
        due.sort_by_key(|c| (c.scheduled_at, c.created_at));
        Ok(due)
    }

    async fn claim_campaign(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, WacastError> {
        self.check_write()?;
        let mut state = self.lock();
        match state.campaigns.get_mut(id) {
            Some(c) if is_due(c, now) => {
                c.campaign.status = CampaignStatus::InProgress;
                c.locked_until = Some(lease_until);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn renew_lease(&self, id: &str, lease_until: DateTime<Utc>) -> Result<(), WacastError> {
        self.check_write()?;
        if let Some(c) = self.lock().campaigns.get_mut(id) {
            if c.campaign.status == CampaignStatus::InProgress {
                c.locked_until = Some(lease_until);
            }
        }
        Ok(())
    }

    async fn list_jobs(&self, campaign_id: &str) -> Result<Vec<SendJob>, WacastError> {
        let mut jobs: Vec<SendJob> = self
            .lock()
            .jobs
            .iter()
            .filter(|j| j.campaign_id == campaign_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.position, j.id));
        Ok(jobs)
    }

    async fn create_jobs(
        &self,
        campaign_id: &str,
        jobs: &[NewSendJob],
    ) -> Result<Vec<SendJob>, WacastError> {
        self.check_write()?;
        {
            let mut state = self.lock();
            for job in jobs {
                let exists = state.jobs.iter().any(|j| {
                    j.campaign_id == campaign_id && j.recipient_phone == job.recipient_phone
                });
                if exists {
                    continue;
                }
                let id = state.jobs.len() as i64 + 1;
                state.jobs.push(SendJob {
                    id,
                    campaign_id: campaign_id.to_string(),
                    position: job.position,
                    recipient_name: job.recipient_name.clone(),
                    recipient_phone: job.recipient_phone.clone(),
                    status: JobStatus::Scheduled,
                    error_detail: None,
                    message_id: None,
                    attempts: 0,
                    sent_at: None,
                });
            }
        }
        self.list_jobs(campaign_id).await
    }

    async fn complete_job(&self, job_id: i64, outcome: &JobOutcome) -> Result<bool, WacastError> {
        self.check_write()?;
        let mut state = self.lock();
        let Some(job) = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Scheduled)
        else {
            return Ok(false);
        };
        job.status = outcome.status();
        match outcome {
            JobOutcome::Success {
                message_id,
                attempts,
            } => {
                job.message_id = message_id.clone();
                job.attempts = *attempts;
                job.sent_at = Some(Utc::now());
            }
            JobOutcome::Error { detail, attempts } => {
                job.error_detail = Some(detail.clone());
                job.attempts = *attempts;
            }
        }
        Ok(true)
    }

    async fn finish_campaign(
        &self,
        id: &str,
        status: CampaignStatus,
    ) -> Result<bool, WacastError> {
        if !status.is_terminal() {
            return Err(WacastError::InvalidTransition {
                entity: "campaign",
                id: id.to_string(),
                detail: format!("{status} is not a terminal status"),
            });
        }
        self.check_write()?;
        let mut state = self.lock();
        match state.campaigns.get_mut(id) {
            Some(c) if c.campaign.status == CampaignStatus::InProgress => {
                c.campaign.status = status;
                c.campaign.completed_at = Some(Utc::now());
                c.locked_until = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pause_campaign(&self, id: &str) -> Result<bool, WacastError> {
        self.check_write()?;
        let mut state = self.lock();
        match state.campaigns.get_mut(id) {
            Some(c)
                if matches!(
                    c.campaign.status,
                    CampaignStatus::Draft | CampaignStatus::Scheduled | CampaignStatus::InProgress
                ) =>
            {
                c.campaign.status = CampaignStatus::Paused;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn resume_campaign(&self, id: &str) -> Result<bool, WacastError> {
        self.check_write()?;
        let mut state = self.lock();
        match state.campaigns.get_mut(id) {
            Some(c) if c.campaign.status == CampaignStatus::Paused => {
                c.campaign.status = CampaignStatus::Scheduled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
