use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::shadow::ShadowChannel;

/// Live per-sensor shadow channels keyed by sensor id
///
/// Cloning shares the same map. Filled during startup, read by the command
/// router and the heartbeat, drained during shutdown.
#[derive(Debug, Clone, Default)]
pub struct ShadowFleet {
    channels: Arc<RwLock<BTreeMap<String, Arc<ShadowChannel>>>>,
}

impl ShadowFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, sensor_id: impl Into<String>, channel: Arc<ShadowChannel>) {
        self.channels.write().await.insert(sensor_id.into(), channel);
    }

    pub async fn get(&self, sensor_id: &str) -> Option<Arc<ShadowChannel>> {
        self.channels.read().await.get(sensor_id).cloned()
    }

    pub async fn sensor_ids(&self) -> Vec<String> {
        self.channels.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Removes and returns every channel
    pub async fn drain(&self) -> Vec<(String, Arc<ShadowChannel>)> {
        std::mem::take(&mut *self.channels.write().await)
            .into_iter()
            .collect()
    }
}
