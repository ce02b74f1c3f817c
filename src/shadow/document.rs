use serde_json::{Map, Value};

use super::messages::ShadowState;

pub type StateMap = Map<String, Value>;

/// Local copy of one named shadow
///
/// `reported` is overwritten freely by the engine. `desired` is only written
/// through [`StateDocument::override_desired`], which the bootstrap publish uses
/// to align the remote desired half with what the device actually reports.
/// There is no locking here; the owning channel serializes access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDocument {
    reported: StateMap,
    desired: Option<StateMap>,
    version: Option<u64>,
}

/// Immutable copy of a document taken for publishing
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub reported: StateMap,
    pub desired: Option<StateMap>,
    pub version: Option<u64>,
}

impl DocumentSnapshot {
    pub fn into_state(self) -> ShadowState {
        ShadowState {
            reported: Some(self.reported),
            desired: self.desired,
        }
    }
}

impl StateDocument {
    pub fn new(reported: StateMap) -> Self {
        Self {
            reported,
            ..Self::default()
        }
    }

    /// Shallow key-wise overwrite of `reported`; nested values are replaced wholesale
    pub fn merge(&mut self, partial: StateMap) {
        for (key, value) in partial {
            self.reported.insert(key, value);
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.reported.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.reported.get(key)
    }

    /// True when `reported[key]` is missing or not equal to `value`
    pub fn differs(&self, key: &str, value: &Value) -> bool {
        self.reported.get(key) != Some(value)
    }

    pub fn reported(&self) -> &StateMap {
        &self.reported
    }

    pub fn desired(&self) -> Option<&StateMap> {
        self.desired.as_ref()
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Makes `desired` a copy of the current `reported` half
    pub fn override_desired(&mut self) {
        self.desired = Some(self.reported.clone());
    }

    /// Records a version from the remote store, ignoring anything older than what we have
    pub fn observe_version(&mut self, version: u64) -> bool {
        match self.version {
            Some(current) if current >= version => false,
            _ => {
                self.version = Some(version);
                true
            }
        }
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            reported: self.reported.clone(),
            desired: self.desired.clone(),
            version: self.version,
        }
    }
}
