// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Send job rows: idempotent creation and single terminal completion.

use rusqlite::params;
use wacast_core::types::{JobOutcome, NewSendJob, SendJob};
use wacast_core::WacastError;

use crate::database::{Database, map_tr_err};
use crate::models::{JOB_COLUMNS, job_from_row};

fn select_jobs(conn: &rusqlite::Connection, campaign_id: &str) -> rusqlite::Result<Vec<SendJob>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {JOB_COLUMNS} FROM send_jobs WHERE campaign_id = ?1 ORDER BY position, id"
    ))?;
    let rows = stmt.query_map(params![campaign_id], job_from_row)?;
    rows.collect()
}

pub async fn list_jobs(db: &Database, campaign_id: &str) -> Result<Vec<SendJob>, WacastError> {
    let campaign_id = campaign_id.to_string();
    db.connection()
        .call(move |conn| select_jobs(conn, &campaign_id))
        .await
        .map_err(map_tr_err)
}

/// `INSERT OR IGNORE` per job, then every job of the campaign.
///
/// The `(campaign_id, recipient_phone)` unique key makes concurrent or
/// repeated calls converge on one row per recipient.
pub async fn create_jobs(
    db: &Database,
    campaign_id: &str,
    jobs: &[NewSendJob],
) -> Result<Vec<SendJob>, WacastError> {
    let campaign_id = campaign_id.to_string();
    let jobs = jobs.to_vec();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO send_jobs
                         (campaign_id, position, recipient_name, recipient_phone)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for job in &jobs {
                    stmt.execute(params![
                        campaign_id,
                        job.position,
                        job.recipient_name,
                        job.recipient_phone
                    ])?;
                }
            }
            let all = select_jobs(&tx, &campaign_id)?;
            tx.commit()?;
            Ok(all)
        })
        .await
        .map_err(map_tr_err)
}

/// Writes a terminal outcome onto a `Scheduled` job.
///
/// Returns `false` when the job was already terminal; the stored outcome
/// is left as it was.
pub async fn complete_job(
    db: &Database,
    job_id: i64,
    outcome: &JobOutcome,
) -> Result<bool, WacastError> {
    let status = outcome.status().to_string();
    let (error_detail, message_id, attempts, sent) = match outcome {
        JobOutcome::Success {
            message_id,
            attempts,
        } => (None, message_id.clone(), *attempts, true),
        JobOutcome::Error { detail, attempts } => (Some(detail.clone()), None, *attempts, false),
    };
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE send_jobs SET status = ?1, error_detail = ?2, message_id = ?3,
                     attempts = ?4,
                     sent_at = CASE WHEN ?5 THEN strftime('%Y-%m-%dT%H:%M:%fZ', 'now') END
                 WHERE id = ?6 AND status = 'Scheduled'",
                params![status, error_detail, message_id, attempts, sent, job_id],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}
