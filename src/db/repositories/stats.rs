use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{
    connection::Database,
    helpers::{optional_from_millis, to_i64, to_millis, to_u64},
};
use crate::models::StorageStats;

pub const BYTES_SENT: &str = "bytes_sent";
pub const REPORTS_SENT: &str = "reports_sent";
pub const OBSERVATIONS_SENT: &str = "observations_sent";
pub const WIFIS_SENT: &str = "wifis_sent";
pub const CELLS_SENT: &str = "cells_sent";
pub const REPORTS_DROPPED: &str = "reports_dropped";
pub const LAST_UPLOAD_TIME: &str = "last_upload_time";
pub const LAST_ATTEMPTED_UPLOAD_TIME: &str = "last_attempted_upload_time";

pub(crate) fn add_stat(conn: &Connection, key: &str, delta: u64) -> Result<()> {
    if delta == 0 {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO stats (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = value + excluded.value",
        params![key, to_i64(delta)?],
    )
    .with_context(|| format!("failed to increment stat {key}"))?;
    Ok(())
}

pub(crate) fn set_stat(conn: &Connection, key: &str, value: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO stats (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )
    .with_context(|| format!("failed to set stat {key}"))?;
    Ok(())
}

fn read_stat(conn: &Connection, key: &str) -> Result<Option<i64>> {
    conn.query_row("SELECT value FROM stats WHERE key = ?1", params![key], |row| {
        row.get(0)
    })
    .optional()
    .with_context(|| format!("failed to read stat {key}"))
}

fn read_counter(conn: &Connection, key: &str) -> Result<u64> {
    to_u64(read_stat(conn, key)?.unwrap_or(0), key)
}

impl Database {
    pub async fn set_stat_timestamp(&self, key: &'static str, at: DateTime<Utc>) -> Result<()> {
        self.execute(move |conn| set_stat(conn, key, to_millis(at)))
            .await
    }

    /// Gauges and counters read in one task, so they describe the same state.
    pub async fn storage_stats(&self) -> Result<StorageStats> {
        self.execute(|conn| {
            let (reports, bytes, wifis, cells): (i64, i64, i64, i64) = conn
                .query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(byte_len), 0),
                            COALESCE(SUM(wifi_count), 0),
                            COALESCE(SUM(cell_count), 0)
                     FROM reports",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .context("failed to total stored reports")?;

            Ok(StorageStats {
                bytes_stored: to_u64(bytes, "byte_len")?,
                reports_stored: to_u64(reports, "report count")?,
                queued_wifis: to_u64(wifis, "wifi_count")?,
                queued_cells: to_u64(cells, "cell_count")?,
                bytes_sent: read_counter(conn, BYTES_SENT)?,
                reports_sent: read_counter(conn, REPORTS_SENT)?,
                observations_sent: read_counter(conn, OBSERVATIONS_SENT)?,
                wifis_sent: read_counter(conn, WIFIS_SENT)?,
                cells_sent: read_counter(conn, CELLS_SENT)?,
                reports_dropped: read_counter(conn, REPORTS_DROPPED)?,
                last_upload_time: optional_from_millis(
                    read_stat(conn, LAST_UPLOAD_TIME)?,
                    LAST_UPLOAD_TIME,
                )?,
                last_attempted_upload_time: optional_from_millis(
                    read_stat(conn, LAST_ATTEMPTED_UPLOAD_TIME)?,
                    LAST_ATTEMPTED_UPLOAD_TIME,
                )?,
            })
        })
        .await
    }
}
