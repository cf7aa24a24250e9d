use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bundle::ObservationBundle;

/// A sealed bundle that has not been written to storage yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReport {
    pub created_at: DateTime<Utc>,
    /// One wire item, already serialized.
    pub payload: String,
    pub wifi_count: u32,
    pub cell_count: u32,
}

impl NewReport {
    pub fn byte_len(&self) -> u64 {
        self.payload.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub payload: String,
    pub wifi_count: u32,
    pub cell_count: u32,
}

impl Report {
    pub fn byte_len(&self) -> u64 {
        self.payload.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellTower {
    pub radio_type: String,
    pub cell_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_area_code: Option<i32>,
    pub mobile_country_code: i32,
    pub mobile_network_code: i32,
    pub age: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asu: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psc: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiAccessPoint {
    pub mac_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u32>,
}

/// Per-bundle object inside the `items` array of an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportItem {
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radio_type: Option<String>,
    #[serde(default)]
    pub cell_towers: Vec<CellTower>,
    #[serde(default)]
    pub wifi_access_points: Vec<WifiAccessPoint>,
}

fn floor_micro_degrees(value: f64) -> f64 {
    (value * 1_000_000.0).floor() / 1_000_000.0
}

fn known(value: i32) -> Option<i32> {
    (value >= 0 && value != i32::MAX).then_some(value)
}

impl ReportItem {
    pub fn from_bundle(bundle: &ObservationBundle) -> Self {
        let fix = bundle.fix();

        let radio_type = bundle
            .cells()
            .first()
            .map(|entry| entry.cell.radio)
            .filter(|radio| radio.is_known())
            .map(|radio| radio.as_str().to_string());

        let cell_towers = bundle
            .cells()
            .iter()
            .map(|entry| {
                let cell = &entry.cell;
                CellTower {
                    radio_type: cell.radio.as_str().to_string(),
                    cell_id: cell.cell_id,
                    location_area_code: known(cell.lac),
                    mobile_country_code: cell.mcc,
                    mobile_network_code: cell.mnc,
                    age: (entry.observed_at - fix.timestamp).num_milliseconds().max(0),
                    asu: cell.asu.and_then(known),
                    psc: cell.psc.and_then(known),
                    signal_strength: cell.signal_strength.filter(|s| *s != 0),
                }
            })
            .collect();

        let wifi_access_points = bundle
            .wifis()
            .iter()
            .map(|wifi| WifiAccessPoint {
                mac_address: wifi.bssid().to_string(),
                signal_strength: (wifi.signal_strength != 0).then_some(wifi.signal_strength),
                frequency: (wifi.frequency != 0).then_some(wifi.frequency),
            })
            .collect();

        Self {
            timestamp: fix.timestamp.timestamp_millis(),
            latitude: floor_micro_degrees(fix.latitude),
            longitude: floor_micro_degrees(fix.longitude),
            altitude: fix.altitude,
            accuracy: fix.accuracy,
            radio_type,
            cell_towers,
            wifi_access_points,
        }
    }
}

const ITEMS_OPEN: &str = "{\"items\":[";
const ITEMS_CLOSE: &str = "]}";

/// Bytes `batch_payload` adds around the item fragments, separators aside.
pub const BATCH_ENVELOPE_LEN: u64 = (ITEMS_OPEN.len() + ITEMS_CLOSE.len()) as u64;

/// Joins stored item fragments into `{"items":[...]}` without re-encoding
/// them, so the bytes sent are the bytes that were stored.
pub fn batch_payload(reports: &[Report]) -> String {
    let inner: usize = reports.iter().map(|r| r.payload.len() + 1).sum();
    let mut body = String::with_capacity(inner + BATCH_ENVELOPE_LEN as usize);
    body.push_str(ITEMS_OPEN);
    for (idx, report) in reports.iter().enumerate() {
        if idx > 0 {
            body.push(',');
        }
        body.push_str(&report.payload);
    }
    body.push_str(ITEMS_CLOSE);
    body
}
