use rand::Rng;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{UploadManager, UploadResult};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Largest random extension added to each wait, as a fraction of it.
const JITTER_DIVISOR: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub max_backoff: Duration,
}

/// Wait between drain cycles: the regular interval, doubled after every
/// temporary failure up to `max_backoff`, reset by anything else.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: SchedulerConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            current: config.interval,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn record(&mut self, result: &UploadResult) {
        self.current = if result.is_temporary_failure() {
            self.current
                .saturating_mul(2)
                .min(self.config.max_backoff.max(self.config.interval))
        } else {
            self.config.interval
        };
    }

    pub fn next_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        let spread = self.current / JITTER_DIVISOR;
        if spread.is_zero() {
            return self.current;
        }
        let extra = rng.gen_range(0..=spread.as_millis() as u64);
        self.current + Duration::from_millis(extra)
    }
}

/// Calls `upload_pending` on the backoff schedule until cancelled. The same
/// token also interrupts an in-flight batch.
pub async fn upload_scheduler(
    manager: UploadManager,
    config: SchedulerConfig,
    cancel_token: CancellationToken,
) {
    let mut backoff = Backoff::new(config);

    loop {
        let delay = backoff.next_delay(&mut rand::thread_rng());
        log_debug!("next upload attempt in {}ms", delay.as_millis());

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                let result = manager.upload_pending(false, &cancel_token).await;
                log_debug!("upload cycle finished: {result:?}");
                backoff.record(&result);
            }
            _ = cancel_token.cancelled() => {
                log_info!("upload scheduler shutting down");
                break;
            }
        }
    }
}
