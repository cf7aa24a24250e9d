use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::models::BundleLimits;
use crate::storage::StorageLimits;
use crate::upload::{SchedulerConfig, SubmitterConfig, UploadConfig};

pub const DEFAULT_SUBMIT_URL: &str = "https://location.services.mozilla.com/v2/geosubmit";

const ENV_SUBMIT_URL: &str = "STUMBLER_SUBMIT_URL";
const ENV_NICKNAME: &str = "STUMBLER_NICKNAME";
const ENV_WIFI_ONLY: &str = "STUMBLER_WIFI_ONLY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StumblerSettings {
    pub max_storage_bytes: u64,
    pub max_retention_weeks: u32,
    pub max_retry_count: u32,
    pub wifi_only_upload_policy: bool,
    pub upload_batch_size_limit: usize,
    pub upload_batch_max_bytes: u64,
    pub min_upload_interval_ms: u64,
    pub max_upload_backoff_ms: u64,
    pub retention_check_interval_ms: u64,
    pub max_wifis_per_location: usize,
    pub max_cells_per_location: usize,
    pub submit_url: String,
    pub nickname: Option<String>,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub success_status: u16,
}

impl Default for StumblerSettings {
    fn default() -> Self {
        Self {
            max_storage_bytes: 20_000_000,
            max_retention_weeks: 4,
            max_retry_count: 5,
            wifi_only_upload_policy: true,
            upload_batch_size_limit: 50,
            upload_batch_max_bytes: 500_000,
            min_upload_interval_ms: 300_000,
            max_upload_backoff_ms: 3_600_000,
            retention_check_interval_ms: 3_600_000,
            max_wifis_per_location: 100,
            max_cells_per_location: 100,
            submit_url: DEFAULT_SUBMIT_URL.into(),
            nickname: None,
            connect_timeout_ms: 2_000,
            read_timeout_ms: 2_000,
            success_status: 204,
        }
    }
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl StumblerSettings {
    /// Applies overrides from `lookup`; unusable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = non_empty(lookup(ENV_SUBMIT_URL)) {
            self.submit_url = url;
        }
        if let Some(nickname) = non_empty(lookup(ENV_NICKNAME)) {
            self.nickname = Some(nickname);
        }
        if let Some(flag) = lookup(ENV_WIFI_ONLY).as_deref().and_then(parse_flag) {
            self.wifi_only_upload_policy = flag;
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    pub fn bundle_limits(&self) -> BundleLimits {
        BundleLimits {
            max_wifis: self.max_wifis_per_location,
            max_cells: self.max_cells_per_location,
        }
    }

    pub fn storage_limits(&self) -> StorageLimits {
        StorageLimits {
            max_bytes: self.max_storage_bytes,
            max_retry_count: self.max_retry_count,
        }
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            wifi_only: self.wifi_only_upload_policy,
            batch_size_limit: self.upload_batch_size_limit.max(1),
            batch_max_bytes: self.upload_batch_max_bytes,
            success_status: self.success_status,
            nickname: self.nickname.clone(),
        }
    }

    pub fn submitter_config(&self) -> SubmitterConfig {
        SubmitterConfig {
            url: self.submit_url.clone(),
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_millis(self.min_upload_interval_ms.max(1)),
            max_backoff: Duration::from_millis(self.max_upload_backoff_ms.max(1)),
        }
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_millis(self.retention_check_interval_ms.max(1))
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<StumblerSettings>,
}

impl SettingsStore {
    /// Loads `path` if it exists (falling back to defaults when it does not
    /// parse), then applies environment overrides.
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data: StumblerSettings = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            StumblerSettings::default()
        };
        data.apply_env_overrides();

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, StumblerSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, StumblerSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self) -> StumblerSettings {
        self.read().clone()
    }

    pub fn nickname(&self) -> Option<String> {
        self.read().nickname.clone()
    }

    pub fn wifi_only_upload_policy(&self) -> bool {
        self.read().wifi_only_upload_policy
    }

    pub fn update_nickname(&self, nickname: Option<String>) -> Result<()> {
        let mut guard = self.write();
        guard.nickname = non_empty(nickname);
        self.persist(&guard)
    }

    pub fn update_wifi_only_upload_policy(&self, wifi_only: bool) -> Result<()> {
        let mut guard = self.write();
        guard.wifi_only_upload_policy = wifi_only;
        self.persist(&guard)
    }

    fn persist(&self, data: &StumblerSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
