use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::blocklist::{Blocklist, BlocklistFilter};
use crate::db::Database;
use crate::models::StorageStats;
use crate::reporter::{Reporter, ReporterController, ReporterHandle, ReporterStats};
use crate::settings::SettingsStore;
use crate::storage::{retention_loop, StorageManager};
use crate::upload::{
    upload_scheduler, HttpSubmitter, NetworkKind, StaticNetworkPolicy, UploadManager,
    UploadResult, UreqSubmitter,
};
use crate::utils::{Clock, SystemClock};

pub const DATABASE_FILE: &str = "stumbler.sqlite3";
pub const SETTINGS_FILE: &str = "settings.json";

/// The running pipeline: reporter, storage, uploads and background loops.
pub struct Stumbler {
    settings: SettingsStore,
    storage: StorageManager,
    reporter: ReporterHandle,
    reporter_controller: ReporterController,
    upload: UploadManager,
    network: Arc<StaticNetworkPolicy>,
    blocklist: Arc<BlocklistFilter>,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Stumbler {
    pub fn start(data_dir: &Path) -> Result<Self> {
        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
        let submitter = Arc::new(UreqSubmitter::new(settings.snapshot().submitter_config()));
        info!("Uploading to {}", submitter.url());
        Self::start_with(data_dir, settings, submitter, Arc::new(SystemClock))
    }

    /// Wires the pipeline with explicit collaborators. Must be called from
    /// inside a tokio runtime.
    pub fn start_with(
        data_dir: &Path,
        settings: SettingsStore,
        submitter: Arc<dyn HttpSubmitter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = settings.snapshot();
        let database = Database::new(data_dir.join(DATABASE_FILE))?;
        let storage = StorageManager::new(database, config.storage_limits(), clock.clone());

        let blocklist = Arc::new(BlocklistFilter::default());
        let mut reporter_controller = ReporterController::new();
        let reporter = reporter_controller.start(
            Reporter::new(config.bundle_limits(), blocklist.clone()),
            storage.clone(),
            clock,
        )?;

        let network = Arc::new(StaticNetworkPolicy::new(NetworkKind::Wifi));
        let upload = UploadManager::new(
            storage.clone(),
            submitter,
            network.clone(),
            config.upload_config(),
        );

        let cancel_token = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(upload_scheduler(
                upload.clone(),
                config.scheduler_config(),
                cancel_token.clone(),
            )),
            tokio::spawn(retention_loop(
                storage.clone(),
                config.max_retention_weeks,
                config.retention_interval(),
                cancel_token.clone(),
            )),
        ];

        Ok(Self {
            settings,
            storage,
            reporter,
            reporter_controller,
            upload,
            network,
            blocklist,
            cancel_token,
            tasks,
        })
    }

    pub fn reporter(&self) -> ReporterHandle {
        self.reporter.clone()
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub async fn reporter_stats(&self) -> Result<ReporterStats> {
        self.reporter.stats().await
    }

    pub async fn storage_stats(&self) -> Result<StorageStats> {
        Ok(self.storage.get_stats().await?)
    }

    /// Manual upload; ignores the Wi-Fi-only policy.
    pub async fn upload_now(&self) -> UploadResult {
        self.upload.upload_pending(true, &self.cancel_token).await
    }

    /// Runs a manual upload on its own task so callers keep feeding events
    /// while batches are in flight.
    pub fn spawn_upload_now(&self) -> JoinHandle<UploadResult> {
        let upload = self.upload.clone();
        let cancel_token = self.cancel_token.clone();
        tokio::spawn(async move { upload.upload_pending(true, &cancel_token).await })
    }

    pub fn set_network(&self, kind: NetworkKind) {
        self.network.set(kind);
    }

    pub fn set_nickname(&self, nickname: Option<String>) -> Result<()> {
        self.settings.update_nickname(nickname)?;
        self.upload.set_nickname(self.settings.nickname());
        Ok(())
    }

    pub fn set_wifi_only_upload_policy(&self, wifi_only: bool) -> Result<()> {
        self.settings.update_wifi_only_upload_policy(wifi_only)?;
        self.upload
            .set_wifi_only(self.settings.wifi_only_upload_policy());
        Ok(())
    }

    pub fn replace_blocklist(&self, lists: Blocklist) {
        self.blocklist.replace(lists);
        info!("Blocklist replaced");
    }

    /// Flushes the open bundle, then stops the background loops. Any batch
    /// still in flight is left for the next run.
    pub async fn shutdown(mut self) -> Result<()> {
        self.reporter_controller.stop().await?;
        self.cancel_token.cancel();
        for task in self.tasks.drain(..) {
            task.await.context("background task failed to join")?;
        }
        info!("Stumbler stopped");
        Ok(())
    }
}

pub fn data_dir_from_env() -> PathBuf {
    std::env::var("STUMBLER_DATA_DIR")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./stumbler-data"))
}
