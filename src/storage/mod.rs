//! Durable report queue on top of the SQLite worker.
//!
//! Every mutation is one closure on the database thread wrapped in a
//! transaction, so readers never see a half-applied store, send, failure or
//! eviction.

pub mod retention;

use std::sync::Arc;

use chrono::Duration;

use crate::db::{Database, InsertOutcome, RetryOutcome, SentTotals};
use crate::errors::StorageError;
use crate::models::{NewReport, Report, StorageStats};
use crate::utils::Clock;

pub use retention::retention_loop;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Share of the quota that quota eviction frees down to.
pub const EVICTION_TARGET_PERCENT: u64 = 90;

const MILLIS_PER_WEEK: i64 = 7 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageLimits {
    pub max_bytes: u64,
    pub max_retry_count: u32,
}

impl StorageLimits {
    pub fn eviction_target(&self) -> u64 {
        self.max_bytes / 100 * EVICTION_TARGET_PERCENT
            + self.max_bytes % 100 * EVICTION_TARGET_PERCENT / 100
    }
}

#[derive(Clone)]
pub struct StorageManager {
    db: Database,
    limits: StorageLimits,
    clock: Arc<dyn Clock>,
}

impl StorageManager {
    pub fn new(db: Database, limits: StorageLimits, clock: Arc<dyn Clock>) -> Self {
        Self { db, limits, clock }
    }

    /// Persists a sealed bundle and returns its id.
    pub async fn store(&self, report: NewReport) -> Result<i64, StorageError> {
        let needed = report.byte_len();
        let max = self.limits.max_bytes;

        match self
            .db
            .insert_report_within_quota(report, max, self.limits.eviction_target())
            .await?
        {
            InsertOutcome::Stored { id, evicted } => {
                if evicted > 0 {
                    log_info!("quota eviction removed {evicted} oldest report(s) to store report {id}");
                }
                Ok(id)
            }
            InsertOutcome::TooLarge => {
                log_warn!("dropping report of {needed} bytes: larger than the {max} byte quota");
                Err(StorageError::CapacityExceeded { needed, max })
            }
        }
    }

    /// Up to `limit` reports, oldest first.
    pub async fn enumerate_pending(&self, limit: usize) -> Result<Vec<Report>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        Ok(self.db.pending_reports(limit).await?)
    }

    pub async fn mark_sent(&self, ids: &[i64]) -> Result<SentTotals, StorageError> {
        if ids.is_empty() {
            return Ok(SentTotals::default());
        }
        Ok(self
            .db
            .delete_sent_reports(ids.to_vec(), self.clock.now())
            .await?)
    }

    /// Bumps retry counts; reports past the retry limit are deleted.
    pub async fn mark_failed(&self, ids: &[i64]) -> Result<RetryOutcome, StorageError> {
        if ids.is_empty() {
            return Ok(RetryOutcome::default());
        }
        let outcome = self
            .db
            .increment_retry_counts(ids.to_vec(), self.limits.max_retry_count)
            .await?;
        for id in &outcome.exhausted {
            log_error!(
                "report {id} dropped after exceeding {} upload retries",
                self.limits.max_retry_count
            );
        }
        Ok(outcome)
    }

    /// Deletes every report created more than `max_age_weeks` ago.
    pub async fn evict_expired(&self, max_age_weeks: u32) -> Result<usize, StorageError> {
        let cutoff = MILLIS_PER_WEEK
            .checked_mul(i64::from(max_age_weeks))
            .and_then(Duration::try_milliseconds)
            .and_then(|window| self.clock.now().checked_sub_signed(window));
        let Some(cutoff) = cutoff else {
            log_debug!("retention window of {max_age_weeks} week(s) is unbounded, nothing to evict");
            return Ok(0);
        };
        let deleted = self.db.delete_reports_created_before(cutoff).await?;
        if deleted > 0 {
            log_info!("retention removed {deleted} report(s) older than {max_age_weeks} week(s)");
        }
        Ok(deleted)
    }

    pub async fn record_upload_attempt(&self) -> Result<(), StorageError> {
        self.db
            .set_stat_timestamp(
                crate::db::repositories::stats::LAST_ATTEMPTED_UPLOAD_TIME,
                self.clock.now(),
            )
            .await?;
        Ok(())
    }

    pub async fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(self.db.storage_stats().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        storage: StorageManager,
    }

    fn fixture(limits: StorageLimits) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("stumbler.db")).unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let storage = StorageManager::new(db, limits, clock.clone());
        Fixture {
            _dir: dir,
            clock,
            storage,
        }
    }

    fn default_limits() -> StorageLimits {
        StorageLimits {
            max_bytes: 1_000_000,
            max_retry_count: 2,
        }
    }

    fn report(fixture: &Fixture, size: usize, wifis: u32, cells: u32) -> NewReport {
        NewReport {
            created_at: fixture.clock.now(),
            payload: format!("\"{}\"", "x".repeat(size.saturating_sub(2))),
            wifi_count: wifis,
            cell_count: cells,
        }
    }

    #[test]
    fn eviction_target_is_ninety_percent() {
        let limits = StorageLimits {
            max_bytes: 1_000,
            max_retry_count: 1,
        };
        assert_eq!(limits.eviction_target(), 900);
        let limits = StorageLimits {
            max_bytes: u64::MAX,
            max_retry_count: 1,
        };
        assert!(limits.eviction_target() < u64::MAX);
    }

    #[tokio::test]
    async fn stored_report_is_enumerated_byte_identical() {
        let fx = fixture(default_limits());
        let new = NewReport {
            created_at: fx.clock.now(),
            payload: r#"{"latitude":20.0,"longitude":30.0,"wifiAccessPoints":[{"macAddress":"0123456789ab"}]}"#.into(),
            wifi_count: 1,
            cell_count: 0,
        };
        let id = fx.storage.store(new.clone()).await.unwrap();

        let pending = fx.storage.enumerate_pending(1).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].payload, new.payload);
        assert_eq!(pending[0].created_at, new.created_at);
        assert_eq!(pending[0].retry_count, 0);
    }

    #[tokio::test]
    async fn pending_reports_come_back_oldest_first() {
        let fx = fixture(default_limits());
        let first = fx.storage.store(report(&fx, 10, 1, 0)).await.unwrap();
        fx.clock.advance(Duration::seconds(1));
        let second = fx.storage.store(report(&fx, 10, 1, 0)).await.unwrap();

        let ids: Vec<_> = fx
            .storage
            .enumerate_pending(10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![first, second]);
        assert!(fx.storage.enumerate_pending(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_sent_deletes_and_credits_counters() {
        let fx = fixture(default_limits());
        let a = fx.storage.store(report(&fx, 40, 3, 1)).await.unwrap();
        let b = fx.storage.store(report(&fx, 60, 2, 2)).await.unwrap();

        let totals = fx.storage.mark_sent(&[a, b]).await.unwrap();
        assert_eq!(totals.reports, 2);
        assert_eq!(totals.bytes, 100);
        assert_eq!(totals.observations, 8);

        assert!(fx.storage.enumerate_pending(10).await.unwrap().is_empty());
        let stats = fx.storage.get_stats().await.unwrap();
        assert_eq!(stats.bytes_sent, 100);
        assert_eq!(stats.observations_sent, 8);
        assert_eq!(stats.wifis_sent, 5);
        assert_eq!(stats.cells_sent, 3);
        assert_eq!(stats.reports_stored, 0);
        assert_eq!(stats.last_upload_time, Some(fx.clock.now()));

        // already gone: counters stay put
        fx.storage.mark_sent(&[a]).await.unwrap();
        assert_eq!(fx.storage.get_stats().await.unwrap().bytes_sent, 100);
    }

    #[tokio::test]
    async fn mark_failed_drops_reports_past_the_retry_limit() {
        let fx = fixture(default_limits());
        let id = fx.storage.store(report(&fx, 10, 1, 0)).await.unwrap();

        for expected in 1..=2 {
            let outcome = fx.storage.mark_failed(&[id]).await.unwrap();
            assert!(outcome.exhausted.is_empty());
            let pending = fx.storage.enumerate_pending(1).await.unwrap();
            assert_eq!(pending[0].retry_count, expected);
        }

        let outcome = fx.storage.mark_failed(&[id]).await.unwrap();
        assert_eq!(outcome.exhausted, vec![id]);
        assert!(fx.storage.enumerate_pending(1).await.unwrap().is_empty());
        assert_eq!(fx.storage.get_stats().await.unwrap().reports_dropped, 1);
    }

    #[tokio::test]
    async fn quota_evicts_oldest_first_down_to_target() {
        let fx = fixture(StorageLimits {
            max_bytes: 1_000,
            max_retry_count: 5,
        });
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(fx.storage.store(report(&fx, 200, 1, 0)).await.unwrap());
            fx.clock.advance(Duration::seconds(1));
        }
        assert_eq!(fx.storage.get_stats().await.unwrap().bytes_stored, 1_000);

        // 1000 + 200 > 1000, so evict until 200 more fits under 900: two go.
        let newest = fx.storage.store(report(&fx, 200, 1, 0)).await.unwrap();

        let remaining: Vec<_> = fx
            .storage
            .enumerate_pending(10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(remaining, vec![ids[2], ids[3], ids[4], newest]);

        let stats = fx.storage.get_stats().await.unwrap();
        assert_eq!(stats.bytes_stored, 800);
        assert_eq!(stats.reports_dropped, 2);
    }

    #[tokio::test]
    async fn oversized_report_is_rejected_without_evicting() {
        let fx = fixture(StorageLimits {
            max_bytes: 100,
            max_retry_count: 5,
        });
        let kept = fx.storage.store(report(&fx, 50, 1, 0)).await.unwrap();

        let err = fx.storage.store(report(&fx, 101, 1, 0)).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::CapacityExceeded {
                needed: 101,
                max: 100
            }
        ));

        let pending = fx.storage.enumerate_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, kept);
        assert_eq!(fx.storage.get_stats().await.unwrap().reports_dropped, 1);
    }

    #[tokio::test]
    async fn evict_expired_respects_the_retention_window() {
        let fx = fixture(default_limits());
        let old = fx.storage.store(report(&fx, 10, 1, 0)).await.unwrap();
        fx.clock.advance(Duration::weeks(3));
        let fresh = fx.storage.store(report(&fx, 10, 0, 1)).await.unwrap();
        fx.clock.advance(Duration::weeks(2));

        assert_eq!(fx.storage.evict_expired(4).await.unwrap(), 1);
        let pending = fx.storage.enumerate_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, fresh);
        assert_ne!(pending[0].id, old);

        let stats = fx.storage.get_stats().await.unwrap();
        assert_eq!(stats.queued_cells, 1);
        assert_eq!(stats.queued_wifis, 0);
    }

    #[tokio::test]
    async fn unbounded_retention_window_evicts_nothing() {
        let fx = fixture(default_limits());
        fx.storage.store(report(&fx, 10, 1, 0)).await.unwrap();
        fx.clock.advance(Duration::weeks(520));

        assert_eq!(fx.storage.evict_expired(u32::MAX).await.unwrap(), 0);
        assert_eq!(fx.storage.enumerate_pending(10).await.unwrap().len(), 1);
        assert_eq!(fx.storage.get_stats().await.unwrap().reports_dropped, 0);
    }

    #[tokio::test]
    async fn upload_attempt_timestamp_is_recorded() {
        let fx = fixture(default_limits());
        assert_eq!(
            fx.storage.get_stats().await.unwrap().last_attempted_upload_time,
            None
        );
        fx.storage.record_upload_attempt().await.unwrap();
        assert_eq!(
            fx.storage.get_stats().await.unwrap().last_attempted_upload_time,
            Some(fx.clock.now())
        );
    }
}
