use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::StorageManager;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// Runs `evict_expired` every `interval` until cancelled. The first pass
/// happens immediately.
pub async fn retention_loop(
    storage: StorageManager,
    max_age_weeks: u32,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = storage.evict_expired(max_age_weeks).await {
                    log_error!("retention pass failed: {err:?}");
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("retention loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::NewReport;
    use crate::storage::StorageLimits;
    use crate::utils::{Clock, ManualClock};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    #[tokio::test]
    async fn first_tick_evicts_and_cancel_stops_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("stumbler.db")).unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let storage = StorageManager::new(
            db,
            StorageLimits {
                max_bytes: 10_000,
                max_retry_count: 5,
            },
            clock.clone(),
        );
        storage
            .store(NewReport {
                created_at: clock.now(),
                payload: "{}".into(),
                wifi_count: 1,
                cell_count: 0,
            })
            .await
            .unwrap();
        clock.advance(chrono::Duration::weeks(5));

        let token = CancellationToken::new();
        let handle = tokio::spawn(retention_loop(
            storage.clone(),
            4,
            Duration::from_secs(3600),
            token.clone(),
        ));

        for _ in 0..100 {
            if storage.get_stats().await.unwrap().reports_stored == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(storage.get_stats().await.unwrap().reports_stored, 0);

        token.cancel();
        handle.await.unwrap();
    }
}
