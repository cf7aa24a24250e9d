//! Privacy filter applied to Wi-Fi observations before they enter a bundle.
//!
//! The lists live in an immutable [`Blocklist`] snapshot. [`BlocklistFilter`]
//! swaps the whole snapshot at once, so a check always sees one consistent
//! set of lists even while a replacement is being installed.

mod lists;

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{canonicalize_bssid, WifiObservation};

pub use lists::{BSSID_OUIS, NULL_BSSID, SSID_PREFIXES, SSID_SUFFIXES, WILDCARD_BSSID};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Blocklist {
    pub ssid_prefixes: Vec<String>,
    pub ssid_suffixes: Vec<String>,
    pub bssid_ouis: Vec<String>,
}

impl Default for Blocklist {
    fn default() -> Self {
        Self {
            ssid_prefixes: SSID_PREFIXES.iter().map(|s| s.to_string()).collect(),
            ssid_suffixes: SSID_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            bssid_ouis: BSSID_OUIS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Blocklist {
    /// Parses a replacement document. Keys that are absent keep the
    /// built-in list; OUIs are normalised to lowercase hex.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let parsed: Blocklist =
            serde_json::from_str(raw).context("failed to parse blocklist document")?;
        Ok(parsed.normalized())
    }

    /// Strips separators from OUIs and lowercases them, dropping empties.
    pub fn normalized(mut self) -> Self {
        self.bssid_ouis = self
            .bssid_ouis
            .iter()
            .map(|oui| {
                oui.chars()
                    .filter(|c| !matches!(c, ':' | '-' | '.'))
                    .map(|c| c.to_ascii_lowercase())
                    .collect::<String>()
            })
            .filter(|oui| !oui.is_empty())
            .collect();
        self
    }

    pub fn blocks_bssid(&self, raw: &str) -> bool {
        let Some(bssid) = canonicalize_bssid(raw) else {
            return true;
        };
        if bssid == NULL_BSSID || bssid == WILDCARD_BSSID {
            return true;
        }
        self.bssid_ouis.iter().any(|oui| bssid.starts_with(oui.as_str()))
    }

    /// A hidden network (no SSID) is not blocked.
    pub fn blocks_ssid(&self, ssid: Option<&str>) -> bool {
        let Some(ssid) = ssid else {
            return false;
        };
        self.ssid_prefixes
            .iter()
            .any(|prefix| ssid.starts_with(prefix.as_str()))
            || self
                .ssid_suffixes
                .iter()
                .any(|suffix| ssid.ends_with(suffix.as_str()))
    }

    pub fn is_blocked(&self, observation: &WifiObservation) -> bool {
        self.blocks_bssid(observation.bssid()) || self.blocks_ssid(observation.ssid.as_deref())
    }
}

/// Shared, hot-swappable handle over the current [`Blocklist`].
#[derive(Debug)]
pub struct BlocklistFilter {
    snapshot: RwLock<Arc<Blocklist>>,
}

impl Default for BlocklistFilter {
    fn default() -> Self {
        Self::new(Blocklist::default())
    }
}

impl BlocklistFilter {
    pub fn new(lists: Blocklist) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(lists)),
        }
    }

    pub fn snapshot(&self) -> Arc<Blocklist> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn is_blocked(&self, observation: &WifiObservation) -> bool {
        self.snapshot().is_blocked(observation)
    }

    pub fn replace(&self, lists: Blocklist) {
        let next = Arc::new(lists.normalized());
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = next;
    }

    pub fn replace_from_json(&self, raw: &str) -> Result<()> {
        let lists = Blocklist::from_json_str(raw)?;
        self.replace(lists);
        Ok(())
    }
}
