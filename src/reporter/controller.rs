use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::storage::StorageManager;
use crate::utils::Clock;

use super::loop_worker::{reporter_loop, ReporterCommand};
use super::state::{Reporter, ReporterStats, ScanEvent};

const COMMAND_QUEUE_DEPTH: usize = 1024;

/// Cloneable sender side of the reporter queue. Every producer (GPS, Wi-Fi
/// scanner, cell scanner) holds one.
#[derive(Clone)]
pub struct ReporterHandle {
    sender: mpsc::Sender<ReporterCommand>,
}

impl ReporterHandle {
    pub async fn send(&self, event: ScanEvent) -> Result<()> {
        self.sender
            .send(ReporterCommand::Event(event))
            .await
            .map_err(|_| anyhow!("reporter is not running"))
    }

    pub async fn stats(&self) -> Result<ReporterStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(ReporterCommand::Stats(reply_tx))
            .await
            .map_err(|_| anyhow!("reporter is not running"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("reporter stopped before answering"))
    }
}

pub struct ReporterController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl Default for ReporterController {
    fn default() -> Self {
        Self::new()
    }
}

impl ReporterController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(
        &mut self,
        reporter: Reporter,
        storage: StorageManager,
        clock: Arc<dyn Clock>,
    ) -> Result<ReporterHandle> {
        if self.handle.is_some() {
            bail!("reporter already running");
        }

        let cancel_token = CancellationToken::new();
        let (sender, receiver) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        let handle = tokio::spawn(reporter_loop(
            reporter,
            storage,
            clock,
            receiver,
            cancel_token.clone(),
        ));

        info!("Reporter started");
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(ReporterHandle { sender })
    }

    /// Stops the loop after it has drained queued events and flushed the
    /// open bundle.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("reporter loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}
