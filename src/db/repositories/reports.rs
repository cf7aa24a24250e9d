use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::stats::{
    add_stat, set_stat, BYTES_SENT, CELLS_SENT, LAST_UPLOAD_TIME, OBSERVATIONS_SENT,
    REPORTS_DROPPED, REPORTS_SENT, WIFIS_SENT,
};
use crate::db::{
    connection::Database,
    helpers::{from_millis, to_i64, to_millis, to_u32, to_u64},
};
use crate::models::{NewReport, Report};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Stored { id: i64, evicted: usize },
    /// Larger than the whole quota. Nothing was evicted and the report is
    /// counted as dropped.
    TooLarge,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SentTotals {
    pub reports: u64,
    pub bytes: u64,
    pub observations: u64,
    pub wifis: u64,
    pub cells: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryOutcome {
    pub incremented: usize,
    /// Reports deleted because their retry count passed the limit.
    pub exhausted: Vec<i64>,
}

fn row_to_report(row: &Row) -> Result<Report> {
    let created_at_ms: i64 = row.get("created_at_ms")?;
    let retry_count: i64 = row.get("retry_count")?;
    let wifi_count: i64 = row.get("wifi_count")?;
    let cell_count: i64 = row.get("cell_count")?;

    Ok(Report {
        id: row.get("id")?,
        created_at: from_millis(created_at_ms, "created_at_ms")?,
        retry_count: to_u32(retry_count, "retry_count")?,
        payload: row.get("payload")?,
        wifi_count: to_u32(wifi_count, "wifi_count")?,
        cell_count: to_u32(cell_count, "cell_count")?,
    })
}

fn stored_bytes(conn: &Connection) -> Result<u64> {
    let total: i64 = conn
        .query_row("SELECT COALESCE(SUM(byte_len), 0) FROM reports", [], |row| {
            row.get(0)
        })
        .context("failed to sum stored bytes")?;
    to_u64(total, "byte_len")
}

/// Deletes oldest reports until `needed` more bytes fit under `target`.
fn evict_oldest(conn: &Connection, needed: u64, target: u64) -> Result<usize> {
    let mut current = stored_bytes(conn)?;
    let mut evicted = 0usize;

    let mut select = conn.prepare(
        "SELECT id, byte_len FROM reports ORDER BY created_at_ms ASC, id ASC LIMIT 1",
    )?;
    let mut delete = conn.prepare("DELETE FROM reports WHERE id = ?1")?;

    while current.saturating_add(needed) > target {
        let oldest: Option<(i64, i64)> = select
            .query_row([], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        let Some((id, byte_len)) = oldest else {
            break;
        };
        delete.execute(params![id])?;
        current = current.saturating_sub(to_u64(byte_len, "byte_len")?);
        evicted += 1;
    }

    add_stat(conn, REPORTS_DROPPED, evicted as u64)?;
    Ok(evicted)
}

impl Database {
    /// Inserts a report, evicting oldest-first when it would not fit.
    ///
    /// Eviction only starts when `max_bytes` would be exceeded, and then
    /// continues down to `target_bytes`. Runs as one transaction.
    pub async fn insert_report_within_quota(
        &self,
        report: NewReport,
        max_bytes: u64,
        target_bytes: u64,
    ) -> Result<InsertOutcome> {
        self.execute(move |conn| {
            let needed = report.byte_len();
            let tx = conn.transaction()?;

            if needed > max_bytes {
                add_stat(&tx, REPORTS_DROPPED, 1)?;
                tx.commit()?;
                return Ok(InsertOutcome::TooLarge);
            }

            let evicted = if stored_bytes(&tx)? + needed > max_bytes {
                evict_oldest(&tx, needed, target_bytes.min(max_bytes))?
            } else {
                0
            };

            tx.execute(
                "INSERT INTO reports (created_at_ms, retry_count, payload, byte_len, wifi_count, cell_count)
                 VALUES (?1, 0, ?2, ?3, ?4, ?5)",
                params![
                    to_millis(report.created_at),
                    report.payload,
                    to_i64(needed)?,
                    report.wifi_count,
                    report.cell_count,
                ],
            )
            .context("failed to insert report")?;
            let id = tx.last_insert_rowid();

            tx.commit()?;
            Ok(InsertOutcome::Stored { id, evicted })
        })
        .await
    }

    pub async fn pending_reports(&self, limit: usize) -> Result<Vec<Report>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, created_at_ms, retry_count, payload, wifi_count, cell_count
                 FROM reports
                 ORDER BY created_at_ms ASC, id ASC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![to_i64(limit as u64)?])?;
            let mut reports = Vec::new();
            while let Some(row) = rows.next()? {
                reports.push(row_to_report(row)?);
            }
            Ok(reports)
        })
        .await
    }

    /// Deletes uploaded reports and credits the sent counters with exactly
    /// the rows that were still present.
    pub async fn delete_sent_reports(
        &self,
        ids: Vec<i64>,
        sent_at: DateTime<Utc>,
    ) -> Result<SentTotals> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut totals = SentTotals::default();

            {
                let mut select = tx.prepare(
                    "SELECT byte_len, wifi_count, cell_count FROM reports WHERE id = ?1",
                )?;
                let mut delete = tx.prepare("DELETE FROM reports WHERE id = ?1")?;

                for id in &ids {
                    let row: Option<(i64, i64, i64)> = select
                        .query_row(params![id], |row| {
                            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                        })
                        .optional()?;
                    let Some((bytes, wifis, cells)) = row else {
                        continue;
                    };
                    delete.execute(params![id])?;

                    let wifis = to_u64(wifis, "wifi_count")?;
                    let cells = to_u64(cells, "cell_count")?;
                    totals.reports += 1;
                    totals.bytes += to_u64(bytes, "byte_len")?;
                    totals.wifis += wifis;
                    totals.cells += cells;
                    totals.observations += wifis + cells;
                }
            }

            add_stat(&tx, REPORTS_SENT, totals.reports)?;
            add_stat(&tx, BYTES_SENT, totals.bytes)?;
            add_stat(&tx, OBSERVATIONS_SENT, totals.observations)?;
            add_stat(&tx, WIFIS_SENT, totals.wifis)?;
            add_stat(&tx, CELLS_SENT, totals.cells)?;
            if totals.reports > 0 {
                set_stat(&tx, LAST_UPLOAD_TIME, to_millis(sent_at))?;
            }

            tx.commit()?;
            Ok(totals)
        })
        .await
    }

    /// Bumps retry counts and deletes the reports that went past
    /// `max_retry_count`.
    pub async fn increment_retry_counts(
        &self,
        ids: Vec<i64>,
        max_retry_count: u32,
    ) -> Result<RetryOutcome> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut outcome = RetryOutcome::default();

            {
                let mut bump = tx.prepare(
                    "UPDATE reports SET retry_count = retry_count + 1 WHERE id = ?1
                     RETURNING retry_count",
                )?;
                let mut delete = tx.prepare("DELETE FROM reports WHERE id = ?1")?;

                for id in &ids {
                    let retries: Option<i64> = bump
                        .query_row(params![id], |row| row.get(0))
                        .optional()?;
                    let Some(retries) = retries else {
                        continue;
                    };
                    outcome.incremented += 1;

                    if retries > i64::from(max_retry_count) {
                        delete.execute(params![id])?;
                        outcome.exhausted.push(*id);
                    }
                }
            }

            add_stat(&tx, REPORTS_DROPPED, outcome.exhausted.len() as u64)?;
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    pub async fn delete_reports_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let deleted = tx
                .execute(
                    "DELETE FROM reports WHERE created_at_ms < ?1",
                    params![to_millis(cutoff)],
                )
                .context("failed to delete expired reports")?;
            add_stat(&tx, REPORTS_DROPPED, deleted as u64)?;
            tx.commit()?;
            Ok(deleted)
        })
        .await
    }
}
