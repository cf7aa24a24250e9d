use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkKind {
    /// Unmetered connection.
    Wifi,
    Metered,
    Offline,
}

/// Answers "what network are we on right now".
pub trait NetworkPolicy: Send + Sync {
    fn current(&self) -> NetworkKind;
}

/// Network state set from outside, e.g. by a platform connectivity callback.
#[derive(Debug)]
pub struct StaticNetworkPolicy {
    kind: Mutex<NetworkKind>,
}

impl StaticNetworkPolicy {
    pub fn new(kind: NetworkKind) -> Self {
        Self {
            kind: Mutex::new(kind),
        }
    }

    pub fn set(&self, kind: NetworkKind) {
        let mut guard = match self.kind.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = kind;
    }
}

impl NetworkPolicy for StaticNetworkPolicy {
    fn current(&self) -> NetworkKind {
        match self.kind.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
