// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable campaign, recipient list and send job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::WacastError;
use crate::types::{
    Campaign, CampaignStatus, Contact, JobOutcome, NewCampaign, NewSendJob, RecipientList,
    SendJob,
};

/// Campaign progress store shared by every dispatcher replica.
///
/// Conditional updates carry the state machine: a claim only succeeds on a
/// due row, a job completion only on a `Scheduled` job, a finish only on an
/// `InProgress` campaign.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn create_recipient_list(
        &self,
        name: &str,
        contacts: &[Contact],
    ) -> Result<RecipientList, WacastError>;

    async fn get_recipient_list(&self, id: &str) -> Result<Option<RecipientList>, WacastError>;

    async fn create_campaign(&self, campaign: NewCampaign) -> Result<Campaign, WacastError>;

    async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>, WacastError>;

    /// `Draft`/`Scheduled` campaigns scheduled at or before `now`, plus
    /// `InProgress` campaigns whose lease expired.
    async fn due_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, WacastError>;

    /// Moves a due campaign to `InProgress` and leases it until `lease_until`.
    /// Returns `false` if another worker holds it or it is no longer due.
    async fn claim_campaign(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, WacastError>;

    async fn renew_lease(&self, id: &str, lease_until: DateTime<Utc>) -> Result<(), WacastError>;

    /// Jobs of a campaign in recipient-list order.
    async fn list_jobs(&self, campaign_id: &str) -> Result<Vec<SendJob>, WacastError>;

    /// Creates jobs that do not exist yet and returns all jobs of the campaign.
    async fn create_jobs(
        &self,
        campaign_id: &str,
        jobs: &[NewSendJob],
    ) -> Result<Vec<SendJob>, WacastError>;

    /// Records a terminal outcome. Returns `false` if the job was already terminal.
    async fn complete_job(&self, job_id: i64, outcome: &JobOutcome) -> Result<bool, WacastError>;

    /// Resolves an `InProgress` campaign to a terminal status.
    async fn finish_campaign(
        &self,
        id: &str,
        status: CampaignStatus,
    ) -> Result<bool, WacastError>;

    /// `Draft`/`Scheduled`/`InProgress` to `Paused`.
    async fn pause_campaign(&self, id: &str) -> Result<bool, WacastError>;

    /// `Paused` back to `Scheduled`.
    async fn resume_campaign(&self, id: &str) -> Result<bool, WacastError>;
}
