// SPDX-FileCopyrightText: 2026 Wacast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row mapping between SQLite and the core domain types.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use wacast_core::types::{Campaign, CampaignStatus, JobStatus, SendJob};

/// Stored timestamp layout; lexical order equals time order.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub(crate) const CAMPAIGN_COLUMNS: &str = "id, device_id, name, text, image_url, \
     recipient_list_id, delay_seconds, scheduled_at, status, created_at, completed_at";

pub(crate) const JOB_COLUMNS: &str = "id, campaign_id, position, recipient_name, \
     recipient_phone, status, error_detail, message_id, attempts, sent_at";

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

fn opt_ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_ts(idx, &r)).transpose()
}

fn enum_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = strum::ParseError>,
{
    let raw: String = row.get(idx)?;
    T::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Maps a row selected with [`CAMPAIGN_COLUMNS`].
pub(crate) fn campaign_from_row(row: &Row<'_>) -> rusqlite::Result<Campaign> {
    Ok(Campaign {
        id: row.get(0)?,
        device_id: row.get(1)?,
        name: row.get(2)?,
        text: row.get(3)?,
        image_url: row.get(4)?,
        recipient_list_id: row.get(5)?,
        delay_seconds: row.get(6)?,
        scheduled_at: ts_at(row, 7)?,
        status: enum_at::<CampaignStatus>(row, 8)?,
        created_at: ts_at(row, 9)?,
        completed_at: opt_ts_at(row, 10)?,
    })
}

/// Maps a row selected with [`JOB_COLUMNS`].
pub(crate) fn job_from_row(row: &Row<'_>) -> rusqlite::Result<SendJob> {
    Ok(SendJob {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        position: row.get(2)?,
        recipient_name: row.get(3)?,
        recipient_phone: row.get(4)?,
        status: enum_at::<JobStatus>(row, 5)?,
        error_detail: row.get(6)?,
        message_id: row.get(7)?,
        attempts: row.get(8)?,
        sent_at: opt_ts_at(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_match_sqlite_strftime_layout() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(format_ts(ts), "2026-03-04T05:06:07.000Z");
        assert_eq!(parse_ts(0, "2026-03-04T05:06:07.000Z").unwrap(), ts);
    }

    #[test]
    fn rfc3339_input_is_accepted() {
        let ts = parse_ts(0, "2026-03-04T05:06:07+00:00").unwrap();
        assert_eq!(format_ts(ts), "2026-03-04T05:06:07.000Z");
    }

    #[test]
    fn garbage_is_a_conversion_error() {
        assert!(matches!(
            parse_ts(3, "yesterday"),
            Err(rusqlite::Error::FromSqlConversionFailure(3, Type::Text, _))
        ));
    }
}
