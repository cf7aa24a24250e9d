//! Radio and GPS observation types.
//!
//! Raw scan results arrive from the platform scanners; they are canonicalised
//! and validated here before the reporter lets them near a bundle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Platform value for "field not reported".
pub const UNKNOWN_CELL_VALUE: i32 = -1;

const BSSID_LEN: usize = 12;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RadioType {
    Gsm,
    Cdma,
    Wcdma,
    Lte,
    Unknown,
}

impl Default for RadioType {
    fn default() -> Self {
        RadioType::Unknown
    }
}

impl RadioType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RadioType::Gsm => "gsm",
            RadioType::Cdma => "cdma",
            RadioType::Wcdma => "wcdma",
            RadioType::Lte => "lte",
            RadioType::Unknown => "",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, RadioType::Unknown)
    }
}

/// A single GPS fix; every bundle is anchored at one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

/// Wi-Fi scan result as delivered by the platform, before canonicalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiScanResult {
    pub bssid: String,
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub signal_strength: i32,
    #[serde(default)]
    pub frequency: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiObservation {
    bssid: String,
    pub ssid: Option<String>,
    pub signal_strength: i32,
    pub frequency: u32,
}

impl WifiObservation {
    pub fn new(
        raw_bssid: &str,
        ssid: Option<String>,
        signal_strength: i32,
        frequency: u32,
    ) -> Result<Self, ValidationError> {
        let bssid = canonicalize_bssid(raw_bssid)
            .ok_or_else(|| ValidationError::InvalidBssid(raw_bssid.to_string()))?;
        Ok(Self {
            bssid,
            ssid,
            signal_strength,
            frequency,
        })
    }

    /// Always 12 lowercase hex characters.
    pub fn bssid(&self) -> &str {
        &self.bssid
    }
}

impl TryFrom<WifiScanResult> for WifiObservation {
    type Error = ValidationError;

    fn try_from(raw: WifiScanResult) -> Result<Self, Self::Error> {
        WifiObservation::new(&raw.bssid, raw.ssid, raw.signal_strength, raw.frequency)
    }
}

/// Identity used to deduplicate cells inside a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub radio: RadioType,
    pub mcc: i32,
    pub mnc: i32,
    pub lac: i32,
    pub cell_id: i32,
    pub psc: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellObservation {
    #[serde(default)]
    pub radio: RadioType,
    pub mcc: i32,
    pub mnc: i32,
    #[serde(default = "unknown_cell_value")]
    pub lac: i32,
    pub cell_id: i32,
    #[serde(default)]
    pub psc: Option<i32>,
    #[serde(default)]
    pub asu: Option<i32>,
    #[serde(default)]
    pub signal_strength: Option<i32>,
}

fn unknown_cell_value() -> i32 {
    UNKNOWN_CELL_VALUE
}

fn is_known_cell_value(value: i32) -> bool {
    value >= 0 && value != i32::MAX
}

impl CellObservation {
    /// Rejects cells whose country, network or cell id carry a sentinel.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_known_cell_value(self.mcc) {
            return Err(ValidationError::InvalidCell("mobile country code"));
        }
        if !is_known_cell_value(self.mnc) {
            return Err(ValidationError::InvalidCell("mobile network code"));
        }
        if !is_known_cell_value(self.cell_id) {
            return Err(ValidationError::InvalidCell("cell id"));
        }
        Ok(())
    }

    pub fn key(&self) -> CellKey {
        CellKey {
            radio: self.radio,
            mcc: self.mcc,
            mnc: self.mnc,
            lac: self.lac,
            cell_id: self.cell_id,
            psc: self.psc.filter(|psc| is_known_cell_value(*psc)),
        }
    }
}

/// Normalises a BSSID to 12 lowercase hex characters.
///
/// Accepts `:`, `-` and `.` delimiters. Returns `None` when the result is not
/// canonical; feeding a canonical value back in returns it unchanged.
pub fn canonicalize_bssid(raw: &str) -> Option<String> {
    if is_canonical_bssid(raw) {
        return Some(raw.to_string());
    }

    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .map(|c| c.to_ascii_lowercase())
        .collect();

    is_canonical_bssid(&stripped).then_some(stripped)
}

pub fn is_canonical_bssid(value: &str) -> bool {
    value.len() == BSSID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_delimiters_and_lowercases() {
        assert_eq!(
            canonicalize_bssid("01:23:45:67:89:AB").as_deref(),
            Some("0123456789ab")
        );
        assert_eq!(
            canonicalize_bssid("01-23-45-67-89-ab").as_deref(),
            Some("0123456789ab")
        );
        assert_eq!(
            canonicalize_bssid("0123.4567.89AB").as_deref(),
            Some("0123456789ab")
        );
    }

    #[test]
    fn canonicalize_is_idempotent() {
        for raw in ["01:23:45:67:89:AB", "0123456789ab", "DE-AD-BE-EF-00-01"] {
            let once = canonicalize_bssid(raw).unwrap();
            let twice = canonicalize_bssid(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn malformed_bssids_are_rejected() {
        for raw in ["", "0123456789a", "0123456789abc", "01:23:45:67:89:zz", "01 23 45 67 89 ab"] {
            assert!(canonicalize_bssid(raw).is_none(), "accepted {raw:?}");
            assert!(matches!(
                WifiObservation::new(raw, None, -50, 2412),
                Err(ValidationError::InvalidBssid(_))
            ));
        }
    }

    #[test]
    fn cell_with_sentinel_identity_is_invalid() {
        let mut cell = CellObservation {
            radio: RadioType::Gsm,
            mcc: 262,
            mnc: 7,
            lac: 1234,
            cell_id: 5678,
            psc: None,
            asu: Some(20),
            signal_strength: None,
        };
        assert!(cell.validate().is_ok());

        cell.mcc = UNKNOWN_CELL_VALUE;
        assert_eq!(
            cell.validate(),
            Err(ValidationError::InvalidCell("mobile country code"))
        );

        cell.mcc = 262;
        cell.cell_id = i32::MAX;
        assert_eq!(cell.validate(), Err(ValidationError::InvalidCell("cell id")));
    }

    #[test]
    fn cell_key_ignores_signal_fields() {
        let a = CellObservation {
            radio: RadioType::Lte,
            mcc: 310,
            mnc: 260,
            lac: 10,
            cell_id: 99,
            psc: Some(UNKNOWN_CELL_VALUE),
            asu: Some(10),
            signal_strength: Some(-90),
        };
        let mut b = a.clone();
        b.asu = Some(31);
        b.psc = None;
        assert_eq!(a.key(), b.key());
    }
}
