pub mod bundle;
pub mod observation;
pub mod report;
pub mod stats;

pub use bundle::{BundleLimits, BundledCell, ObservationBundle, PushOutcome};
pub use observation::{
    canonicalize_bssid, CellKey, CellObservation, GpsFix, RadioType, WifiObservation,
    WifiScanResult, UNKNOWN_CELL_VALUE,
};
pub use report::{
    batch_payload, CellTower, NewReport, Report, ReportItem, WifiAccessPoint, BATCH_ENVELOPE_LEN,
};
pub use stats::StorageStats;
