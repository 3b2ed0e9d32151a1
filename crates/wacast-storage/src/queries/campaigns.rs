// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recipient lists and campaign lifecycle.
//!
//! Status changes are conditional updates so the table itself enforces the
//! campaign state machine, also across replicas sharing the database.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use wacast_core::types::{Campaign, CampaignStatus, Contact, NewCampaign, RecipientList};
use wacast_core::WacastError;

use crate::database::{Database, map_tr_err};
use crate::models::{CAMPAIGN_COLUMNS, campaign_from_row, format_ts};

/// Due predicate shared by the due query and the claim.
/// `?1` is the current time.
const DUE_PREDICATE: &str = "((status IN ('Draft', 'Scheduled') AND scheduled_at <= ?1)
      OR (status = 'InProgress' AND (locked_until IS NULL OR locked_until <= ?1)))";

pub async fn create_recipient_list(
    db: &Database,
    name: &str,
    contacts: &[Contact],
) -> Result<RecipientList, WacastError> {
    let list = RecipientList {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        contacts: contacts.to_vec(),
    };
    let row = list.clone();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO recipient_lists (id, name) VALUES (?1, ?2)",
                params![row.id, row.name],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO recipients (list_id, position, name, phone)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (position, contact) in row.contacts.iter().enumerate() {
                    stmt.execute(params![row.id, position as i64, contact.name, contact.phone])?;
                }
            }
            tx.commit()
        })
        .await
        .map_err(map_tr_err)?;
    Ok(list)
}

pub async fn get_recipient_list(
    db: &Database,
    id: &str,
) -> Result<Option<RecipientList>, WacastError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let name: Option<String> = conn
                .query_row(
                    "SELECT name FROM recipient_lists WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(name) = name else {
                return Ok(None);
            };
            let mut stmt = conn.prepare(
                "SELECT name, phone FROM recipients WHERE list_id = ?1 ORDER BY position",
            )?;
            let contacts = stmt
                .query_map(params![id], |row| {
                    Ok(Contact {
                        name: row.get(0)?,
                        phone: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(RecipientList { id, name, contacts }))
        })
        .await
        .map_err(map_tr_err)
}

pub async fn create_campaign(db: &Database, new: NewCampaign) -> Result<Campaign, WacastError> {
    let id = uuid::Uuid::new_v4().to_string();
    let insert_id = id.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO campaigns (id, device_id, name, text, image_url,
                     recipient_list_id, delay_seconds, scheduled_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    insert_id,
                    new.device_id,
                    new.name,
                    new.text,
                    new.image_url,
                    new.recipient_list_id,
                    new.delay_seconds,
                    format_ts(new.scheduled_at),
                    new.status.to_string(),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

    get_campaign(db, &id).await?.ok_or_else(|| WacastError::NotFound {
        entity: "campaign",
        id,
    })
}

pub async fn get_campaign(db: &Database, id: &str) -> Result<Option<Campaign>, WacastError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![id],
                campaign_from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Campaigns a dispatcher may claim at `now`, oldest schedule first.
pub async fn due_campaigns(
    db: &Database,
    now: DateTime<Utc>,
) -> Result<Vec<Campaign>, WacastError> {
    let now = format_ts(now);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
                 WHERE {DUE_PREDICATE}
                 ORDER BY scheduled_at ASC, created_at ASC"
            ))?;
            let rows = stmt.query_map(params![now], campaign_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

/// Atomically moves a still-due campaign to `InProgress` under a lease.
pub async fn claim_campaign(
    db: &Database,
    id: &str,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
) -> Result<bool, WacastError> {
    let id = id.to_string();
    let now = format_ts(now);
    let lease_until = format_ts(lease_until);
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                &format!(
                    "UPDATE campaigns SET status = 'InProgress', locked_until = ?2,
                         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?3 AND {DUE_PREDICATE}"
                ),
                params![now, lease_until, id],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn renew_lease(
    db: &Database,
    id: &str,
    lease_until: DateTime<Utc>,
) -> Result<(), WacastError> {
    let id = id.to_string();
    let lease_until = format_ts(lease_until);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE campaigns SET locked_until = ?1
                 WHERE id = ?2 AND status = 'InProgress'",
                params![lease_until, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Resolves an `InProgress` campaign. Terminal and paused rows are untouched.
pub async fn finish_campaign(
    db: &Database,
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
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE campaigns SET status = ?1, locked_until = NULL,
                     completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?2 AND status = 'InProgress'",
                params![status.to_string(), id],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn pause_campaign(db: &Database, id: &str) -> Result<bool, WacastError> {
    set_status_from(db, id, "Paused", &["Draft", "Scheduled", "InProgress"]).await
}

pub async fn resume_campaign(db: &Database, id: &str) -> Result<bool, WacastError> {
    set_status_from(db, id, "Scheduled", &["Paused"]).await
}

async fn set_status_from(
    db: &Database,
    id: &str,
    to: &'static str,
    from: &'static [&'static str],
) -> Result<bool, WacastError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM campaigns WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            match current {
                Some(s) if from.contains(&s.as_str()) => {
                    let changed = conn.execute(
                        "UPDATE campaigns SET status = ?1, locked_until = NULL,
                             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                         WHERE id = ?2 AND status = ?3",
                        params![to, id, s],
                    )?;
                    Ok(changed == 1)
                }
                _ => Ok(false),
            }
        })
        .await
        .map_err(map_tr_err)
}
