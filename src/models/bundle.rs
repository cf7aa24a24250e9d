use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::observation::{CellKey, CellObservation, GpsFix, WifiObservation};
use super::report::{NewReport, ReportItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleLimits {
    pub max_wifis: usize,
    pub max_cells: usize,
}

impl Default for BundleLimits {
    fn default() -> Self {
        Self {
            max_wifis: 100,
            max_cells: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BundledCell {
    pub cell: CellObservation,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Added,
    Duplicate,
    /// The bundle must be flushed before this observation can be taken.
    Full,
}

/// Observations collected around a single GPS fix.
///
/// Wi-Fi entries are unique by BSSID and cells by [`CellKey`], both kept in
/// insertion order. A bundle never reaches its cap: the observation that
/// would fill it is refused with [`PushOutcome::Full`] and starts the next
/// bundle instead. An empty bundle always accepts.
#[derive(Debug, Clone)]
pub struct ObservationBundle {
    fix: GpsFix,
    limits: BundleLimits,
    wifis: Vec<WifiObservation>,
    wifi_keys: HashSet<String>,
    cells: Vec<BundledCell>,
    cell_keys: HashSet<CellKey>,
}

impl ObservationBundle {
    pub fn new(fix: GpsFix, limits: BundleLimits) -> Self {
        Self {
            fix,
            limits: BundleLimits {
                max_wifis: limits.max_wifis.max(1),
                max_cells: limits.max_cells.max(1),
            },
            wifis: Vec::new(),
            wifi_keys: HashSet::new(),
            cells: Vec::new(),
            cell_keys: HashSet::new(),
        }
    }

    pub fn fix(&self) -> &GpsFix {
        &self.fix
    }

    pub fn wifis(&self) -> &[WifiObservation] {
        &self.wifis
    }

    pub fn cells(&self) -> &[BundledCell] {
        &self.cells
    }

    pub fn wifi_count(&self) -> usize {
        self.wifis.len()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wifis.is_empty() && self.cells.is_empty()
    }

    pub fn push_wifi(&mut self, wifi: WifiObservation) -> PushOutcome {
        if self.wifi_keys.contains(wifi.bssid()) {
            return PushOutcome::Duplicate;
        }
        if !self.wifis.is_empty() && self.wifis.len() + 1 >= self.limits.max_wifis {
            return PushOutcome::Full;
        }
        self.wifi_keys.insert(wifi.bssid().to_string());
        self.wifis.push(wifi);
        PushOutcome::Added
    }

    pub fn push_cell(&mut self, cell: CellObservation, observed_at: DateTime<Utc>) -> PushOutcome {
        let key = cell.key();
        if self.cell_keys.contains(&key) {
            return PushOutcome::Duplicate;
        }
        if !self.cells.is_empty() && self.cells.len() + 1 >= self.limits.max_cells {
            return PushOutcome::Full;
        }
        self.cell_keys.insert(key);
        self.cells.push(BundledCell { cell, observed_at });
        PushOutcome::Added
    }

    /// A fresh, empty bundle anchored at the same fix.
    pub fn restart(&self) -> Self {
        Self::new(self.fix.clone(), self.limits)
    }

    /// Serializes the bundle into its persisted form.
    pub fn seal(&self, created_at: DateTime<Utc>) -> Result<NewReport> {
        let item = ReportItem::from_bundle(self);
        let payload = serde_json::to_string(&item)?;
        Ok(NewReport {
            created_at,
            payload,
            wifi_count: self.wifis.len() as u32,
            cell_count: self.cells.len() as u32,
        })
    }
}
