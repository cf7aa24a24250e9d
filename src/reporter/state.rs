use std::collections::HashSet;
use std::mem;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blocklist::BlocklistFilter;
use crate::models::{
    BundleLimits, CellKey, CellObservation, GpsFix, ObservationBundle, PushOutcome,
    WifiObservation, WifiScanResult,
};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// Input to the reporter. One JSON object per line on stdin, e.g.
/// `{"type":"gpsFix","data":{"latitude":20.0,"longitude":30.0,"timestamp":"2024-05-01T12:00:00Z"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ScanEvent {
    GpsFix(GpsFix),
    LocationLost,
    WifiScan(Vec<WifiScanResult>),
    CellScan(Vec<CellObservation>),
    Flush,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReporterStats {
    pub bundles_flushed: u64,
    pub bundles_discarded: u64,
    pub unique_wifis: u64,
    pub unique_cells: u64,
    pub rejected_observations: u64,
}

#[derive(Debug)]
enum State {
    Empty,
    Accumulating(ObservationBundle),
}

/// Single-writer bundle state machine.
///
/// `handle` returns the bundles that were closed by the event, already
/// filtered of empty ones, in the order they were closed.
pub struct Reporter {
    state: State,
    limits: BundleLimits,
    blocklist: Arc<BlocklistFilter>,
    seen_wifis: HashSet<String>,
    seen_cells: HashSet<CellKey>,
    stats: ReporterStats,
}

impl Reporter {
    pub fn new(limits: BundleLimits, blocklist: Arc<BlocklistFilter>) -> Self {
        Self {
            state: State::Empty,
            limits,
            blocklist,
            seen_wifis: HashSet::new(),
            seen_cells: HashSet::new(),
            stats: ReporterStats::default(),
        }
    }

    pub fn stats(&self) -> ReporterStats {
        self.stats
    }

    pub fn current_bundle(&self) -> Option<&ObservationBundle> {
        match &self.state {
            State::Empty => None,
            State::Accumulating(bundle) => Some(bundle),
        }
    }

    pub fn is_accumulating(&self) -> bool {
        matches!(self.state, State::Accumulating(_))
    }

    pub fn handle(&mut self, event: ScanEvent, now: DateTime<Utc>) -> Vec<ObservationBundle> {
        let mut closed = Vec::new();
        match event {
            ScanEvent::GpsFix(fix) => {
                let previous = mem::replace(
                    &mut self.state,
                    State::Accumulating(ObservationBundle::new(fix, self.limits)),
                );
                if let State::Accumulating(bundle) = previous {
                    self.close(bundle, &mut closed);
                }
            }
            ScanEvent::LocationLost | ScanEvent::Flush => {
                if let State::Accumulating(bundle) = mem::replace(&mut self.state, State::Empty) {
                    self.close(bundle, &mut closed);
                }
            }
            ScanEvent::WifiScan(results) => {
                if !self.is_accumulating() {
                    log_debug!("ignoring wifi scan of {} result(s) without a fix", results.len());
                    return closed;
                }
                for raw in results {
                    self.add_wifi(raw, &mut closed);
                }
            }
            ScanEvent::CellScan(cells) => {
                if !self.is_accumulating() {
                    log_debug!("ignoring cell scan of {} cell(s) without a fix", cells.len());
                    return closed;
                }
                for cell in cells {
                    self.add_cell(cell, now, &mut closed);
                }
            }
        }
        closed
    }

    fn add_wifi(&mut self, raw: WifiScanResult, closed: &mut Vec<ObservationBundle>) {
        let wifi = match WifiObservation::try_from(raw) {
            Ok(wifi) => wifi,
            Err(err) => {
                log_debug!("dropping wifi: {err}");
                self.stats.rejected_observations += 1;
                return;
            }
        };
        if self.blocklist.is_blocked(&wifi) {
            self.stats.rejected_observations += 1;
            return;
        }

        let State::Accumulating(bundle) = &mut self.state else {
            return;
        };
        let bssid = wifi.bssid().to_string();
        let outcome = match bundle.push_wifi(wifi.clone()) {
            PushOutcome::Full => {
                let fresh = bundle.restart();
                let full = mem::replace(bundle, fresh);
                let outcome = bundle.push_wifi(wifi);
                self.close(full, closed);
                outcome
            }
            outcome => outcome,
        };
        if outcome == PushOutcome::Added && self.seen_wifis.insert(bssid) {
            self.stats.unique_wifis += 1;
        }
    }

    fn add_cell(
        &mut self,
        cell: CellObservation,
        now: DateTime<Utc>,
        closed: &mut Vec<ObservationBundle>,
    ) {
        if let Err(err) = cell.validate() {
            log_debug!("dropping cell: {err}");
            self.stats.rejected_observations += 1;
            return;
        }

        let State::Accumulating(bundle) = &mut self.state else {
            return;
        };
        let key = cell.key();
        let outcome = match bundle.push_cell(cell.clone(), now) {
            PushOutcome::Full => {
                let fresh = bundle.restart();
                let full = mem::replace(bundle, fresh);
                let outcome = bundle.push_cell(cell, now);
                self.close(full, closed);
                outcome
            }
            outcome => outcome,
        };
        if outcome == PushOutcome::Added && self.seen_cells.insert(key) {
            self.stats.unique_cells += 1;
        }
    }

    fn close(&mut self, bundle: ObservationBundle, closed: &mut Vec<ObservationBundle>) {
        if bundle.is_empty() {
            log_debug!("discarding bundle without observations");
            self.stats.bundles_discarded += 1;
            return;
        }
        self.stats.bundles_flushed += 1;
        closed.push(bundle);
    }
}
