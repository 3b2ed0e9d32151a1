// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Auth record and device directory operations.

use rusqlite::{OptionalExtension, params};
use wacast_core::traits::{KeyWrite, RememberedDevice};
use wacast_core::{AuthBlob, AuthCategory, WacastError};

use crate::database::{Database, map_tr_err};

const UPSERT_RECORD: &str = "INSERT INTO auth_records (device_id, category, item_id, value)
     VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT (device_id, category, item_id) DO UPDATE SET
         value = excluded.value,
         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

const DELETE_RECORD: &str =
    "DELETE FROM auth_records WHERE device_id = ?1 AND category = ?2 AND item_id = ?3";

/// Reads one record. A value that is not valid JSON is a storage error.
pub async fn read(
    db: &Database,
    device_id: &str,
    category: AuthCategory,
    item_id: &str,
) -> Result<Option<AuthBlob>, WacastError> {
    let device_id = device_id.to_string();
    let item_id = item_id.to_string();
    let raw: Option<String> = db
        .connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT value FROM auth_records
                 WHERE device_id = ?1 AND category = ?2 AND item_id = ?3",
                params![device_id, category.to_string(), item_id],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)?;

    raw.map(|r| AuthBlob::from_json(&r))
        .transpose()
        .map_err(|e| WacastError::Storage {
            source: Box::new(e),
        })
}

pub async fn write(
    db: &Database,
    device_id: &str,
    category: AuthCategory,
    item_id: &str,
    blob: &AuthBlob,
) -> Result<(), WacastError> {
    let device_id = device_id.to_string();
    let item_id = item_id.to_string();
    let value = blob.to_json();
    db.connection()
        .call(move |conn| {
            conn.execute(
                UPSERT_RECORD,
                params![device_id, category.to_string(), item_id, value],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Applies upserts and deletes in one transaction.
pub async fn write_batch(
    db: &Database,
    device_id: &str,
    writes: Vec<KeyWrite>,
) -> Result<(), WacastError> {
    if writes.is_empty() {
        return Ok(());
    }
    let device_id = device_id.to_string();
    let rows: Vec<(String, String, Option<String>)> = writes
        .into_iter()
        .map(|w| {
            (
                w.category.to_string(),
                w.item_id,
                w.value.map(|v| v.to_json()),
            )
        })
        .collect();

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut upsert = tx.prepare_cached(UPSERT_RECORD)?;
                let mut delete = tx.prepare_cached(DELETE_RECORD)?;
                for (category, item_id, value) in &rows {
                    match value {
                        Some(v) => upsert.execute(params![device_id, category, item_id, v])?,
                        None => delete.execute(params![device_id, category, item_id])?,
                    };
                }
            }
            tx.commit()
        })
        .await
        .map_err(map_tr_err)
}

/// Deletes all records of `device_id` and its directory entry.
pub async fn wipe(db: &Database, device_id: &str) -> Result<u64, WacastError> {
    let device_id = device_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM auth_records WHERE device_id = ?1",
                params![device_id],
            )?;
            tx.execute(
                "DELETE FROM devices WHERE device_id = ?1",
                params![device_id],
            )?;
            tx.commit()?;
            Ok(removed as u64)
        })
        .await
        .map_err(map_tr_err)
}

/// Upserts a device; a `None` name keeps the stored one.
pub async fn remember_device(
    db: &Database,
    device_id: &str,
    connection_name: Option<&str>,
) -> Result<(), WacastError> {
    let device_id = device_id.to_string();
    let connection_name = connection_name.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO devices (device_id, connection_name) VALUES (?1, ?2)
                 ON CONFLICT (device_id) DO UPDATE SET
                     connection_name = COALESCE(excluded.connection_name, devices.connection_name),
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![device_id, connection_name],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn remembered_devices(db: &Database) -> Result<Vec<RememberedDevice>, WacastError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT device_id, connection_name FROM devices ORDER BY created_at, device_id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(RememberedDevice {
                    device_id: row.get(0)?,
                    connection_name: row.get(1)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn devices_with_records(db: &Database) -> Result<Vec<String>, WacastError> {
    db.connection()
        .call(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT device_id FROM auth_records ORDER BY device_id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<Vec<String>, _>>()
        })
        .await
        .map_err(map_tr_err)
}
