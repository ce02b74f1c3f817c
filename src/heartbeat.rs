//! Heartbeat - periodic health sampling into the device-level shadow
//!
//! A single tokio task samples `GET /health` on a fixed interval and feeds the
//! result into the reported state, independent of any remote traffic.
//!
//! # Loop
//!
//! ```text
//! ┌─► cancelled? ──yes──► exit
//! │       │ no
//! │   sleep(interval)  (interruptible by stop)
//! │       │
//! │   cancelled? ──yes──► exit
//! │       │ no
//! │   sample /health  (never interrupted)
//! │    ok │      │ err
//! │   merge +   log, keep stale reported
//! │   publish    │
//! └───────┴──────┘
//! ```
//!
//! Stopping is level-triggered through a [`CancellationToken`]: the wait
//! between samples ends immediately, a sample that is already running
//! finishes before the task exits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::device_api::{ApiError, DeviceApi, Health};
use crate::sensors::{SensorChange, SharedRegistry, ShadowFleet};
use crate::shadow::ShadowChannel;

#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    /// Time between two health samples
    pub interval: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Applies health samples to the device shadow, the registry and the sensor shadows
///
/// Used once during bootstrap and then on every heartbeat. The command router
/// feeds confirmed changes through [`HealthSync::record_change`] so the
/// device shadow does not wait for the next sample to see them.
pub struct HealthSync {
    api: Arc<dyn DeviceApi>,
    device: Arc<ShadowChannel>,
    registry: SharedRegistry,
    fleet: ShadowFleet,
}

impl HealthSync {
    pub fn new(
        api: Arc<dyn DeviceApi>,
        device: Arc<ShadowChannel>,
        registry: SharedRegistry,
        fleet: ShadowFleet,
    ) -> Self {
        Self {
            api,
            device,
            registry,
            fleet,
        }
    }

    pub fn device(&self) -> &Arc<ShadowChannel> {
        &self.device
    }

    pub async fn sample(&self) -> Result<Health, ApiError> {
        self.api.health().await
    }

    /// Merges a sample into the device shadow, rebuilds the sensor index,
    /// mirrors changed `active` flags into live sensor shadows and publishes
    pub async fn apply(&self, health: &Health, override_desired: bool) {
        let health = self.keep_known_settings(health).await;
        self.device.merge(health.to_state()).await;
        self.registry
            .write()
            .await
            .rebuild_index(health.sensors.clone());

        for sensor in &health.sensors {
            let Some(channel) = self.fleet.get(&sensor.sensor_id).await else {
                continue;
            };
            let active = Value::Bool(sensor.active);
            if channel.reported_value("active").await.as_ref() != Some(&active) {
                debug!("{}: active changed to {}", sensor.sensor_id, sensor.active);
                channel.set("active", active).await;
                channel.publish_update(false).await;
            }
        }

        self.device.publish_update(override_desired).await;
    }

    /// Records without settings inherit the ones already known for that sensor
    async fn keep_known_settings(&self, health: &Health) -> Health {
        let registry = self.registry.read().await;
        let mut health = health.clone();
        for sensor in health.sensors.iter_mut().filter(|s| s.settings.is_none()) {
            sensor.settings = registry
                .get(&sensor.sensor_id)
                .and_then(|known| known.settings.clone());
        }
        health
    }

    /// Writes a confirmed change into the sensor shadow, the registry and the
    /// device shadow's sensor list, publishing both shadows
    pub async fn record_change(&self, sensor_id: &str, change: SensorChange) {
        if let Some(channel) = self.fleet.get(sensor_id).await {
            channel.set(change.key(), change.value()).await;
            channel.publish_update(false).await;
        }

        let sensors = {
            let mut registry = self.registry.write().await;
            if !registry.update(sensor_id, &change) {
                debug!("{}: not in the sensor list, device shadow unchanged", sensor_id);
                return;
            }
            registry.to_value()
        };
        self.device.set("sensors", sensors).await;
        self.device.publish_update(false).await;
    }

    /// One heartbeat: sample, then apply. Nothing is published when sampling fails.
    pub async fn beat(&self) -> Result<(), ApiError> {
        let health = self.sample().await?;
        self.apply(&health, false).await;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct HeartbeatStats {
    samples: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatStatsSnapshot {
    pub samples: u64,
    pub failures: u64,
}

pub struct HeartbeatScheduler;

impl HeartbeatScheduler {
    /// Spawns the heartbeat task; the first sample is taken after one interval
    pub fn spawn(sync: Arc<HealthSync>, settings: HeartbeatSettings) -> HeartbeatHandle {
        let cancel = CancellationToken::new();
        let stats = Arc::new(HeartbeatStats::default());

        info!("Starting heartbeat every {:?}", settings.interval);
        let task = tokio::spawn(Self::run(
            sync,
            settings.interval,
            cancel.clone(),
            stats.clone(),
        ));

        HeartbeatHandle {
            cancel,
            task: Some(task),
            stats,
        }
    }

    async fn run(
        sync: Arc<HealthSync>,
        interval: Duration,
        cancel: CancellationToken,
        stats: Arc<HeartbeatStats>,
    ) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if cancel.is_cancelled() {
                break;
            }

            match sync.beat().await {
                Ok(()) => {
                    stats.samples.fetch_add(1, Ordering::Relaxed);
                    debug!("Heartbeat published");
                }
                Err(e) => {
                    stats.failures.fetch_add(1, Ordering::Relaxed);
                    error!("Heartbeat sample failed, not publishing: {}", e);
                }
            }
        }
        info!("Heartbeat stopped");
    }
}

/// Handle to the running heartbeat task
pub struct HeartbeatHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    stats: Arc<HeartbeatStats>,
}

impl HeartbeatHandle {
    pub fn stats(&self) -> HeartbeatStatsSnapshot {
        HeartbeatStatsSnapshot {
            samples: self.stats.samples.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signals the task to stop and waits for it to exit
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Heartbeat task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
