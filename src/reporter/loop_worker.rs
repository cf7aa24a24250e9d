use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::errors::StorageError;
use crate::models::ObservationBundle;
use crate::storage::StorageManager;
use crate::utils::Clock;

use super::state::{Reporter, ReporterStats, ScanEvent};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

pub enum ReporterCommand {
    Event(ScanEvent),
    Stats(oneshot::Sender<ReporterStats>),
}

/// Owns the [`Reporter`] and applies commands strictly one at a time.
///
/// On cancellation, commands already queued are applied and the open
/// bundle is flushed before the loop exits.
pub async fn reporter_loop(
    mut reporter: Reporter,
    storage: StorageManager,
    clock: Arc<dyn Clock>,
    mut commands: mpsc::Receiver<ReporterCommand>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(command) => apply(&mut reporter, &storage, clock.as_ref(), command).await,
                    None => {
                        log_info!("reporter channel closed");
                        break;
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                while let Ok(command) = commands.try_recv() {
                    apply(&mut reporter, &storage, clock.as_ref(), command).await;
                }
                log_info!("reporter loop shutting down");
                break;
            }
        }
    }

    let closed = reporter.handle(ScanEvent::Flush, clock.now());
    persist(&storage, clock.as_ref(), closed).await;
}

async fn apply(
    reporter: &mut Reporter,
    storage: &StorageManager,
    clock: &dyn Clock,
    command: ReporterCommand,
) {
    match command {
        ReporterCommand::Event(event) => {
            let closed = reporter.handle(event, clock.now());
            persist(storage, clock, closed).await;
        }
        ReporterCommand::Stats(reply) => {
            let _ = reply.send(reporter.stats());
        }
    }
}

async fn persist(storage: &StorageManager, clock: &dyn Clock, closed: Vec<ObservationBundle>) {
    for bundle in closed {
        let report = match bundle.seal(clock.now()) {
            Ok(report) => report,
            Err(err) => {
                log_error!("failed to serialize bundle: {err:?}");
                continue;
            }
        };
        let (wifis, cells) = (report.wifi_count, report.cell_count);
        match storage.store(report).await {
            Ok(id) => log_info!("flushed bundle as report {id} ({wifis} wifi, {cells} cell)"),
            // already logged as a quota drop
            Err(StorageError::CapacityExceeded { .. }) => {}
            Err(err) => log_error!("failed to store bundle: {err:?}"),
        }
    }
}
