use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters owned by the storage manager.
///
/// `bytes_stored`, `reports_stored`, `queued_wifis` and `queued_cells` are
/// gauges over the current queue. Everything else only grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub bytes_stored: u64,
    pub reports_stored: u64,
    pub queued_wifis: u64,
    pub queued_cells: u64,
    pub bytes_sent: u64,
    pub reports_sent: u64,
    pub observations_sent: u64,
    pub wifis_sent: u64,
    pub cells_sent: u64,
    pub reports_dropped: u64,
    pub last_upload_time: Option<DateTime<Utc>>,
    pub last_attempted_upload_time: Option<DateTime<Utc>>,
}
