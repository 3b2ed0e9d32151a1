// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wacast_config::model::DispatcherConfig;
use wacast_core::types::{Campaign, CampaignStatus, JobOutcome, JobStatus};
use wacast_core::{CampaignStore, OutboundMessage, OutboundSender, PhoneRules, WacastError};

use crate::plan::plan_jobs;

/// Longest wait between two attempts of one job.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// How one claimed campaign's run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CampaignRun {
    /// Another worker holds the campaign.
    NotClaimed,
    /// All jobs are terminal and the campaign was closed with this status.
    Finished(CampaignStatus),
    /// The campaign left `InProgress` (paused) before every job ran.
    Stopped,
    /// Shutdown was requested; remaining jobs stay scheduled.
    Interrupted,
    /// A storage error ended the run; the lease expires and a later cycle
    /// resumes it.
    Aborted(String),
}

#[derive(Debug, Default)]
pub struct CycleReport {
    /// Set when another cycle was still running and this one did nothing.
    pub skipped: bool,
    pub runs: Vec<(String, CampaignRun)>,
}

pub struct Dispatcher {
    store: Arc<dyn CampaignStore>,
    sender: Arc<dyn OutboundSender>,
    config: DispatcherConfig,
    phone: PhoneRules,
    cycle_running: AtomicBool,
}

/// Clears the running flag when a cycle ends, including by cancellation.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        sender: Arc<dyn OutboundSender>,
        config: DispatcherConfig,
        phone: PhoneRules,
    ) -> Self {
        Self {
            store,
            sender,
            config,
            phone,
            cycle_running: AtomicBool::new(false),
        }
    }

    /// Polls for due campaigns until cancelled.
    ///
    /// The first cycle runs immediately. Ticks that fall due while a cycle
    /// is still running are dropped, not queued.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            max_concurrent_campaigns = self.config.max_concurrent_campaigns,
            "campaign dispatcher started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.run_cycle(&cancel).await;
                    if !report.runs.is_empty() {
                        debug!(campaigns = report.runs.len(), "dispatch cycle finished");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("campaign dispatcher shutting down");
                    break;
                }
            }
        }
    }

    /// One poll: claim and process every due campaign.
    ///
    /// Returns immediately with `skipped` set if another cycle is in
    /// progress.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        if self
            .cycle_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("previous dispatch cycle still running, skipping");
            return CycleReport {
                skipped: true,
                runs: Vec::new(),
            };
        }
        let _guard = CycleGuard(&self.cycle_running);

        let due = match self.store.due_campaigns(Utc::now()).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "failed to load due campaigns");
                return CycleReport::default();
            }
        };
        if due.is_empty() {
            return CycleReport::default();
        }
        debug!(count = due.len(), "due campaigns found");

        let runs: Vec<(String, CampaignRun)> = stream::iter(due)
            .map(|campaign| async move {
                let id = campaign.id.clone();
                let run = match self.process(campaign, cancel).await {
                    Ok(run) => run,
                    Err(e) => {
                        error!(campaign_id = %id, error = %e, "campaign run aborted");
                        CampaignRun::Aborted(e.to_string())
                    }
                };
                (id, run)
            })
            .buffer_unordered(self.config.max_concurrent_campaigns.max(1))
            .collect()
            .await;
        CycleReport {
            skipped: false,
            runs,
        }
    }

    fn lease_until(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(self.config.lease_secs as i64)
    }

    async fn process(
        &self,
        campaign: Campaign,
        cancel: &CancellationToken,
    ) -> Result<CampaignRun, WacastError> {
        let id = campaign.id.as_str();
        if !self
            .store
            .claim_campaign(id, Utc::now(), self.lease_until())
            .await?
        {
            debug!(campaign_id = %id, "campaign claimed elsewhere");
            return Ok(CampaignRun::NotClaimed);
        }
        info!(
            campaign_id = %id,
            name = %campaign.name,
            device_id = %campaign.device_id,
            "campaign started"
        );

        // Jobs are planned once; a resumed run works on the existing rows
        // even if the list changed since.
        let mut jobs = self.store.list_jobs(id).await?;
        if jobs.is_empty() {
            let Some(list) = self
                .store
                .get_recipient_list(&campaign.recipient_list_id)
                .await?
            else {
                warn!(
                    campaign_id = %id,
                    list_id = %campaign.recipient_list_id,
                    "recipient list missing, failing campaign"
                );
                self.store.finish_campaign(id, CampaignStatus::Failed).await?;
                return Ok(CampaignRun::Finished(CampaignStatus::Failed));
            };
            jobs = self
                .store
                .create_jobs(id, &plan_jobs(&list, &self.phone))
                .await?;
        } else {
            debug!(campaign_id = %id, jobs = jobs.len(), "reusing existing jobs");
        }
        let pending: Vec<_> = jobs
            .into_iter()
            .filter(|j| j.status == JobStatus::Scheduled)
            .collect();

        let delay =
            Duration::from_secs(campaign.effective_delay_secs(self.config.default_delay_secs));
        let message = campaign.message();

        for (i, job) in pending.iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Ok(CampaignRun::Interrupted),
                }
            }
            if cancel.is_cancelled() {
                return Ok(CampaignRun::Interrupted);
            }

            match self.store.get_campaign(id).await? {
                Some(current) if current.status == CampaignStatus::InProgress => {}
                current => {
                    info!(
                        campaign_id = %id,
                        status = ?current.map(|c| c.status),
                        "campaign no longer in progress, stopping"
                    );
                    return Ok(CampaignRun::Stopped);
                }
            }
            self.store.renew_lease(id, self.lease_until()).await?;

            let Some(outcome) = self
                .send_with_retry(&campaign.device_id, &job.recipient_phone, &message, cancel)
                .await
            else {
                return Ok(CampaignRun::Interrupted);
            };
            match &outcome {
                JobOutcome::Success { attempts, .. } => {
                    debug!(campaign_id = %id, job_id = job.id, attempts, "job sent")
                }
                JobOutcome::Error { detail, attempts } => {
                    warn!(
                        campaign_id = %id,
                        job_id = job.id,
                        attempts,
                        error = %detail,
                        "job failed"
                    )
                }
            }
            if !self.store.complete_job(job.id, &outcome).await? {
                debug!(campaign_id = %id, job_id = job.id, "job already completed");
            }
        }

        let jobs = self.store.list_jobs(id).await?;
        if jobs.iter().any(|j| j.status == JobStatus::Scheduled) {
            warn!(campaign_id = %id, "jobs still scheduled after run");
            return Ok(CampaignRun::Stopped);
        }
        let successes = jobs.iter().filter(|j| j.status == JobStatus::Success).count();
        let errors = jobs.len() - successes;
        let status = CampaignStatus::from_outcomes(successes, errors);
        if self.store.finish_campaign(id, status).await? {
            info!(campaign_id = %id, %status, successes, errors, "campaign finished");
            Ok(CampaignRun::Finished(status))
        } else {
            debug!(campaign_id = %id, "campaign left InProgress before it could finish");
            Ok(CampaignRun::Stopped)
        }
    }

    /// Sends one job, retrying transient failures with doubling delays.
    ///
    /// A dedup-window rejection waits at least until the window has passed.
    ///
    /// Returns `None` when cancelled between attempts.
    async fn send_with_retry(
        &self,
        device_id: &str,
        phone: &str,
        message: &OutboundMessage,
        cancel: &CancellationToken,
    ) -> Option<JobOutcome> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sender.send(device_id, phone, message).await {
                Ok(receipt) => {
                    return Some(JobOutcome::Success {
                        message_id: receipt.message_id,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let wait = self
                        .retry_delay(attempt)
                        .max(e.retry_after().unwrap_or_default());
                    debug!(
                        device_id,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "send failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => return None,
                    }
                }
                Err(e) => {
                    return Some(JobOutcome::Error {
                        detail: e.to_string(),
                        attempts: attempt,
                    });
                }
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.config.retry_base_ms)
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY)
    }
}
