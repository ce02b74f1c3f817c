use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Result of bringing one reported key in line with its desired value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    /// New reported value to merge, if anything was applied
    pub reported: Option<Value>,
    pub error: Option<String>,
}

impl Reconciled {
    pub fn applied(value: Value) -> Self {
        Self {
            reported: Some(value),
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            reported: None,
            error: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Applies a desired value for one key of a shadow to the physical device
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, desired: &Value, reported: Option<&Value>) -> Reconciled;
}

/// Per-key reconciliation handlers of a shadow channel
///
/// Keys without a handler are ignored when a delta arrives.
#[derive(Clone, Default)]
pub struct ReconcilerTable {
    handlers: HashMap<String, Arc<dyn Reconciler>>,
}

impl fmt::Debug for ReconcilerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

impl ReconcilerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, reconciler: Arc<dyn Reconciler>) -> Self {
        self.insert(key, reconciler);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, reconciler: Arc<dyn Reconciler>) {
        self.handlers.insert(key.into(), reconciler);
    }

    pub fn get(&self, key: &str) -> Option<&Arc<dyn Reconciler>> {
        self.handlers.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
