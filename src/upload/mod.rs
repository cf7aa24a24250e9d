//! Drains the report queue to the collection endpoint.

pub mod network;
pub mod scheduler;
pub mod submitter;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::errors::UploadError;
use crate::models::{batch_payload, Report, BATCH_ENVELOPE_LEN};
use crate::storage::StorageManager;
use crate::utils::gzip::gzip;

pub use network::{NetworkKind, NetworkPolicy, StaticNetworkPolicy};
pub use scheduler::{upload_scheduler, Backoff, SchedulerConfig};
pub use submitter::{HttpSubmitter, SubmitRequest, SubmitterConfig, UreqSubmitter};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    pub wifi_only: bool,
    pub batch_size_limit: usize,
    /// Uncompressed payload bytes per batch; a batch always holds at least
    /// one report.
    pub batch_max_bytes: u64,
    pub success_status: u16,
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    AlreadyInProgress,
    NetworkPolicy,
    Offline,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub batches_sent: u32,
    pub reports_sent: u64,
    pub bytes_sent: u64,
    pub reports_failed: u64,
    pub reports_dropped: u64,
}

#[derive(Debug)]
pub enum UploadResult {
    Skipped(SkipReason),
    Completed(UploadSummary),
    /// The cycle stopped at the first failed batch.
    Failed {
        summary: UploadSummary,
        error: UploadError,
    },
    /// Shutdown interrupted a batch; it was neither marked sent nor failed.
    Cancelled(UploadSummary),
}

impl UploadResult {
    pub fn is_temporary_failure(&self) -> bool {
        matches!(self, UploadResult::Failed { error, .. } if error.is_temporary())
    }

    pub fn summary(&self) -> Option<&UploadSummary> {
        match self {
            UploadResult::Skipped(_) => None,
            UploadResult::Completed(summary)
            | UploadResult::Failed { summary, .. }
            | UploadResult::Cancelled(summary) => Some(summary),
        }
    }
}

/// Clears the in-flight flag when the cycle ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum BatchOutcome {
    Status(u16),
    Transport(UploadError),
    Cancelled,
}

struct UploadInner {
    storage: StorageManager,
    submitter: Arc<dyn HttpSubmitter>,
    network: Arc<dyn NetworkPolicy>,
    config: UploadConfig,
    wifi_only: AtomicBool,
    nickname: RwLock<Option<String>>,
    in_flight: AtomicBool,
}

#[derive(Clone)]
pub struct UploadManager {
    inner: Arc<UploadInner>,
}

impl UploadManager {
    pub fn new(
        storage: StorageManager,
        submitter: Arc<dyn HttpSubmitter>,
        network: Arc<dyn NetworkPolicy>,
        config: UploadConfig,
    ) -> Self {
        Self {
            inner: Arc::new(UploadInner {
                storage,
                submitter,
                network,
                wifi_only: AtomicBool::new(config.wifi_only),
                nickname: RwLock::new(config.nickname.clone()),
                in_flight: AtomicBool::new(false),
                config,
            }),
        }
    }

    pub fn set_wifi_only(&self, wifi_only: bool) {
        self.inner.wifi_only.store(wifi_only, Ordering::Release);
    }

    pub fn set_nickname(&self, nickname: Option<String>) {
        let mut guard = match self.inner.nickname.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = nickname;
    }

    fn nickname(&self) -> Option<String> {
        match self.inner.nickname.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_uploading(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Runs one drain cycle.
    ///
    /// A call made while another cycle is running returns
    /// `Skipped(AlreadyInProgress)` immediately.
    pub async fn upload_pending(
        &self,
        ignore_network_policy: bool,
        cancel_token: &CancellationToken,
    ) -> UploadResult {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log_debug!("upload already in progress, coalescing trigger");
            return UploadResult::Skipped(SkipReason::AlreadyInProgress);
        }
        let _guard = InFlightGuard(&self.inner.in_flight);

        if !ignore_network_policy {
            match self.inner.network.current() {
                NetworkKind::Offline => return UploadResult::Skipped(SkipReason::Offline),
                NetworkKind::Metered if self.inner.wifi_only.load(Ordering::Acquire) => {
                    return UploadResult::Skipped(SkipReason::NetworkPolicy);
                }
                _ => {}
            }
        }

        let mut summary = UploadSummary::default();

        if let Err(err) = self.inner.storage.record_upload_attempt().await {
            log_error!("failed to record upload attempt: {err:?}");
            return UploadResult::Failed {
                summary,
                error: err.into(),
            };
        }

        loop {
            if cancel_token.is_cancelled() {
                return UploadResult::Cancelled(summary);
            }

            let batch = match self.next_batch().await {
                Ok(batch) => batch,
                Err(error) => return UploadResult::Failed { summary, error },
            };
            if batch.is_empty() {
                break;
            }

            let ids: Vec<i64> = batch.iter().map(|r| r.id).collect();
            let body = batch_payload(&batch);
            let body_len = body.len() as u64;

            let error = match self.send_batch(body.into_bytes(), cancel_token).await {
                BatchOutcome::Cancelled => {
                    log_info!("upload cancelled with {} report(s) in flight", ids.len());
                    return UploadResult::Cancelled(summary);
                }
                BatchOutcome::Status(status) if status == self.inner.config.success_status => {
                    log_info!("uploaded {} report(s), {} bytes, HTTP {status}", ids.len(), body_len);
                    match self.inner.storage.mark_sent(&ids).await {
                        Ok(totals) => {
                            summary.batches_sent += 1;
                            summary.reports_sent += totals.reports;
                            summary.bytes_sent += totals.bytes;
                            continue;
                        }
                        Err(err) => {
                            log_error!("failed to mark {} report(s) sent: {err:?}", ids.len());
                            return UploadResult::Failed {
                                summary,
                                error: err.into(),
                            };
                        }
                    }
                }
                BatchOutcome::Status(status) => {
                    log_warn!("upload of {} report(s) rejected with HTTP {status}", ids.len());
                    UploadError::ServerRejected { status }
                }
                BatchOutcome::Transport(err) => {
                    log_warn!("upload of {} report(s) failed: {err}", ids.len());
                    err
                }
            };

            match self.inner.storage.mark_failed(&ids).await {
                Ok(outcome) => {
                    summary.reports_failed += outcome.incremented as u64;
                    summary.reports_dropped += outcome.exhausted.len() as u64;
                }
                Err(err) => log_error!("failed to mark {} report(s) failed: {err:?}", ids.len()),
            }
            return UploadResult::Failed { summary, error };
        }

        UploadResult::Completed(summary)
    }

    /// Oldest reports, bounded by count and by uncompressed bytes.
    async fn next_batch(&self) -> Result<Vec<Report>, UploadError> {
        let mut pending = self
            .inner
            .storage
            .enumerate_pending(self.inner.config.batch_size_limit.max(1))
            .await?;

        let max_bytes = self.inner.config.batch_max_bytes;
        let mut total = BATCH_ENVELOPE_LEN;
        let mut keep = 0usize;
        for report in &pending {
            let separator = u64::from(keep > 0);
            let next = total + report.byte_len() + separator;
            if keep > 0 && next > max_bytes {
                break;
            }
            total = next;
            keep += 1;
        }
        pending.truncate(keep);
        Ok(pending)
    }

    /// Gzips and submits; a compression or transport failure gets one more
    /// try with the plain body.
    async fn send_batch(&self, body: Vec<u8>, cancel_token: &CancellationToken) -> BatchOutcome {
        let nickname = self.nickname();

        match gzip(&body) {
            Ok(zipped) => {
                let request = SubmitRequest {
                    body: zipped,
                    gzipped: true,
                    nickname: nickname.clone(),
                };
                match self.submit(request, cancel_token).await {
                    BatchOutcome::Transport(err) => {
                        log_warn!("gzip upload failed ({err}), retrying uncompressed");
                    }
                    outcome => return outcome,
                }
            }
            Err(err) => log_warn!("gzip failed ({err:?}), sending uncompressed"),
        }

        let request = SubmitRequest {
            body,
            gzipped: false,
            nickname,
        };
        self.submit(request, cancel_token).await
    }

    async fn submit(&self, request: SubmitRequest, cancel_token: &CancellationToken) -> BatchOutcome {
        let submitter = Arc::clone(&self.inner.submitter);
        let task = tokio::task::spawn_blocking(move || submitter.submit(&request));

        tokio::select! {
            joined = task => match joined {
                Ok(Ok(status)) => BatchOutcome::Status(status),
                Ok(Err(err)) => BatchOutcome::Transport(err),
                Err(join_err) => BatchOutcome::Transport(UploadError::Transport(format!(
                    "submit worker failed: {join_err}"
                ))),
            },
            _ = cancel_token.cancelled() => BatchOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::NewReport;
    use crate::storage::StorageLimits;
    use crate::utils::gzip::gunzip;
    use crate::utils::{Clock, ManualClock};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Reply {
        Status(u16),
        Transport,
    }

    #[derive(Default)]
    struct ScriptedSubmitter {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<SubmitRequest>>,
        delay: Option<Duration>,
    }

    impl ScriptedSubmitter {
        fn new(replies: &[Reply]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().copied().collect()),
                ..Self::default()
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay: Some(delay),
                ..Self::default()
            })
        }

        fn requests(&self) -> Vec<SubmitRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl HttpSubmitter for ScriptedSubmitter {
        fn submit(&self, request: &SubmitRequest) -> Result<u16, UploadError> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            self.requests.lock().unwrap().push(request.clone());
            match self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Status(204)) {
                Reply::Status(status) => Ok(status),
                Reply::Transport => Err(UploadError::Transport("connection reset".into())),
            }
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        storage: StorageManager,
        network: Arc<StaticNetworkPolicy>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("stumbler.db")).unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let storage = StorageManager::new(
            db,
            StorageLimits {
                max_bytes: 1_000_000,
                max_retry_count: 1,
            },
            clock.clone(),
        );
        Fixture {
            _dir: dir,
            clock,
            storage,
            network: Arc::new(StaticNetworkPolicy::new(NetworkKind::Wifi)),
        }
    }

    fn config(batch_size_limit: usize) -> UploadConfig {
        UploadConfig {
            wifi_only: true,
            batch_size_limit,
            batch_max_bytes: 500_000,
            success_status: 204,
            nickname: Some("walker".into()),
        }
    }

    impl Fixture {
        fn manager(&self, submitter: Arc<ScriptedSubmitter>, config: UploadConfig) -> UploadManager {
            UploadManager::new(self.storage.clone(), submitter, self.network.clone(), config)
        }

        async fn seed(&self, count: u32) -> Vec<i64> {
            let mut ids = Vec::new();
            for n in 0..count {
                let report = NewReport {
                    created_at: self.clock.now(),
                    payload: format!(r#"{{"latitude":{n}.0,"longitude":1.0}}"#),
                    wifi_count: n + 1,
                    cell_count: 1,
                };
                ids.push(self.storage.store(report).await.unwrap());
                self.clock.advance(ChronoDuration::seconds(1));
            }
            ids
        }
    }

    #[tokio::test]
    async fn successful_batch_marks_every_report_sent() {
        let fx = fixture();
        fx.seed(5).await;
        let submitter = ScriptedSubmitter::new(&[Reply::Status(204)]);
        let manager = fx.manager(submitter.clone(), config(50));

        let result = manager.upload_pending(false, &CancellationToken::new()).await;
        let summary = match result {
            UploadResult::Completed(summary) => summary,
            other => panic!("unexpected result {other:?}"),
        };
        assert_eq!(summary.batches_sent, 1);
        assert_eq!(summary.reports_sent, 5);

        let stats = fx.storage.get_stats().await.unwrap();
        assert_eq!(stats.reports_stored, 0);
        assert_eq!(stats.observations_sent, (1..=5).map(|w| w + 1).sum::<u64>());

        let requests = submitter.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].gzipped);
        assert_eq!(requests[0].nickname.as_deref(), Some("walker"));
        let body: serde_json::Value =
            serde_json::from_slice(&gunzip(&requests[0].body).unwrap()).unwrap();
        assert_eq!(body["items"].as_array().unwrap().len(), 5);
        assert_eq!(body["items"][0]["latitude"], 0.0);
    }

    #[tokio::test]
    async fn server_error_increments_retries_and_stops() {
        let fx = fixture();
        fx.seed(3).await;
        let submitter = ScriptedSubmitter::new(&[Reply::Status(503)]);
        let manager = fx.manager(submitter.clone(), config(2));

        let attempt_at = fx.clock.now();
        let result = manager.upload_pending(false, &CancellationToken::new()).await;
        assert!(result.is_temporary_failure());
        assert!(matches!(
            result,
            UploadResult::Failed {
                error: UploadError::ServerRejected { status: 503 },
                ..
            }
        ));
        assert_eq!(submitter.requests().len(), 1);

        let pending = fx.storage.enumerate_pending(10).await.unwrap();
        let retries: Vec<_> = pending.iter().map(|r| r.retry_count).collect();
        assert_eq!(retries, vec![1, 1, 0]);

        let stats = fx.storage.get_stats().await.unwrap();
        assert_eq!(stats.last_attempted_upload_time, Some(attempt_at));
        assert_eq!(stats.last_upload_time, None);
    }

    #[tokio::test]
    async fn client_error_is_not_temporary() {
        let fx = fixture();
        fx.seed(1).await;
        let manager = fx.manager(ScriptedSubmitter::new(&[Reply::Status(400)]), config(10));

        let result = manager.upload_pending(false, &CancellationToken::new()).await;
        assert!(matches!(result, UploadResult::Failed { .. }));
        assert!(!result.is_temporary_failure());
    }

    #[tokio::test]
    async fn repeated_failures_exhaust_retries() {
        let fx = fixture();
        fx.seed(1).await;
        let manager = fx.manager(
            ScriptedSubmitter::new(&[Reply::Status(500), Reply::Status(500)]),
            config(10),
        );
        let token = CancellationToken::new();

        manager.upload_pending(false, &token).await;
        let result = manager.upload_pending(false, &token).await;
        assert_eq!(result.summary().unwrap().reports_dropped, 1);
        assert!(fx.storage.enumerate_pending(10).await.unwrap().is_empty());
        assert_eq!(fx.storage.get_stats().await.unwrap().reports_dropped, 1);
    }

    #[tokio::test]
    async fn transport_failure_retries_once_uncompressed() {
        let fx = fixture();
        fx.seed(2).await;
        let submitter = ScriptedSubmitter::new(&[Reply::Transport, Reply::Status(204)]);
        let manager = fx.manager(submitter.clone(), config(10));

        let result = manager.upload_pending(false, &CancellationToken::new()).await;
        assert!(matches!(result, UploadResult::Completed(s) if s.reports_sent == 2));

        let requests = submitter.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].gzipped);
        assert!(!requests[1].gzipped);
        assert_eq!(gunzip(&requests[0].body).unwrap(), requests[1].body);
    }

    #[tokio::test]
    async fn second_transport_failure_marks_batch_failed() {
        let fx = fixture();
        fx.seed(1).await;
        let manager = fx.manager(
            ScriptedSubmitter::new(&[Reply::Transport, Reply::Transport]),
            config(10),
        );

        let result = manager.upload_pending(false, &CancellationToken::new()).await;
        assert!(matches!(
            result,
            UploadResult::Failed {
                error: UploadError::Transport(_),
                ..
            }
        ));
        assert_eq!(fx.storage.enumerate_pending(1).await.unwrap()[0].retry_count, 1);
    }

    #[tokio::test]
    async fn metered_network_skips_without_touching_storage() {
        let fx = fixture();
        fx.seed(1).await;
        fx.network.set(NetworkKind::Metered);
        let submitter = ScriptedSubmitter::new(&[]);
        let manager = fx.manager(submitter.clone(), config(10));
        let token = CancellationToken::new();

        let result = manager.upload_pending(false, &token).await;
        assert!(matches!(result, UploadResult::Skipped(SkipReason::NetworkPolicy)));
        assert!(submitter.requests().is_empty());
        assert_eq!(
            fx.storage.get_stats().await.unwrap().last_attempted_upload_time,
            None
        );

        // forced upload ignores the policy
        let result = manager.upload_pending(true, &token).await;
        assert!(matches!(result, UploadResult::Completed(_)));

        fx.seed(1).await;
        manager.set_wifi_only(false);
        let result = manager.upload_pending(false, &token).await;
        assert!(matches!(result, UploadResult::Completed(_)));

        fx.network.set(NetworkKind::Offline);
        let result = manager.upload_pending(false, &token).await;
        assert!(matches!(result, UploadResult::Skipped(SkipReason::Offline)));
    }

    #[tokio::test]
    async fn batches_respect_count_and_byte_limits() {
        let fx = fixture();
        fx.seed(5).await;
        let submitter = ScriptedSubmitter::new(&[]);
        let mut cfg = config(2);
        cfg.batch_max_bytes = 1;
        let manager = fx.manager(submitter.clone(), cfg);

        let result = manager.upload_pending(false, &CancellationToken::new()).await;
        assert!(matches!(result, UploadResult::Completed(s) if s.batches_sent == 5));
        assert_eq!(submitter.requests().len(), 5);

        fx.seed(5).await;
        let submitter = ScriptedSubmitter::new(&[]);
        let manager = fx.manager(submitter.clone(), config(2));
        manager.upload_pending(false, &CancellationToken::new()).await;
        assert_eq!(submitter.requests().len(), 3);
    }

    #[tokio::test]
    async fn byte_limit_covers_the_whole_request_body() {
        let fx = fixture();
        fx.seed(4).await;
        let pending = fx.storage.enumerate_pending(2).await.unwrap();
        let pair_len = batch_payload(&pending).len() as u64;

        let submitter = ScriptedSubmitter::new(&[]);
        let mut cfg = config(10);
        cfg.batch_max_bytes = pair_len - 1;
        let manager = fx.manager(submitter.clone(), cfg);
        manager.upload_pending(false, &CancellationToken::new()).await;

        let requests = submitter.requests();
        assert_eq!(requests.len(), 4);
        for request in &requests {
            assert!(gunzip(&request.body).unwrap().len() as u64 <= pair_len - 1);
        }

        fx.seed(4).await;
        let submitter = ScriptedSubmitter::new(&[]);
        let mut cfg = config(10);
        cfg.batch_max_bytes = pair_len;
        let manager = fx.manager(submitter.clone(), cfg);
        manager.upload_pending(false, &CancellationToken::new()).await;

        let requests = submitter.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(gunzip(&requests[0].body).unwrap().len() as u64, pair_len);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_trigger_is_coalesced() {
        let fx = fixture();
        fx.seed(1).await;
        let submitter = ScriptedSubmitter::slow(Duration::from_millis(300));
        let manager = fx.manager(submitter.clone(), config(10));
        let token = CancellationToken::new();

        let first = tokio::spawn({
            let manager = manager.clone();
            let token = token.clone();
            async move { manager.upload_pending(false, &token).await }
        });
        while !manager.is_uploading() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = manager.upload_pending(false, &token).await;
        assert!(matches!(second, UploadResult::Skipped(SkipReason::AlreadyInProgress)));

        assert!(matches!(first.await.unwrap(), UploadResult::Completed(_)));
        assert_eq!(submitter.requests().len(), 1);
        assert!(!manager.is_uploading());
    }

    #[tokio::test]
    async fn cancellation_leaves_batch_untouched() {
        let fx = fixture();
        fx.seed(2).await;
        let manager = fx.manager(ScriptedSubmitter::slow(Duration::from_millis(300)), config(10));
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            })
        };

        let result = manager.upload_pending(false, &token).await;
        canceller.await.unwrap();
        assert!(matches!(result, UploadResult::Cancelled(s) if s.reports_sent == 0));

        let pending = fx.storage.enumerate_pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|r| r.retry_count == 0));
    }
}
