//! Synchronization agent with statum state machine for startup and teardown
//!
//! Owns every long-lived piece of the engine: the device-level shadow, the
//! per-sensor shadows, the command router and the heartbeat.
//!
//! # State Machine
//!
//! ```text
//! Bootstrapping ──start()──► Running ──shutdown()──► Stopped
//! ```
//!
//! # Startup (strictly sequential)
//!
//! 1. connect transport, optional startup delay
//! 2. device shadow: subscribe, bootstrap health sample, rebuild registry,
//!    publish with desired overridden
//! 3. per sensor: subscribe, seed `active`, fetch settings, publish with
//!    desired overridden
//! 4. command router, writing confirmed changes back through the same
//!    [`HealthSync`] the heartbeat uses
//! 5. heartbeat, last, so no heartbeat publish races a subscription
//!
//! # Shutdown
//!
//! Heartbeat first (stopped and joined), then the router, then every sensor
//! shadow is deleted, then the device shadow, then the transport disconnects.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use statum::{machine, state};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::command::CommandRouter;
use crate::device_api::{ApiError, DeviceApi, Health};
use crate::heartbeat::{
    HealthSync, HeartbeatHandle, HeartbeatScheduler, HeartbeatSettings, HeartbeatStatsSnapshot,
};
use crate::mqtt::{MessageTransport, TransportError};
use crate::sensors::reconcilers::{device_table, sensor_table};
use crate::sensors::{SensorRecord, SensorRegistry, SharedRegistry, ShadowFleet};
use crate::shadow::{ShadowChannel, ShadowError, ShadowName, StateMap};

/// Name of the device-level shadow
pub const DEVICE_SHADOW: &str = "global";

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Shadow error: {0}")]
    Shadow(#[from] ShadowError),

    #[error("No health sample after {attempts} attempts: {source}")]
    Bootstrap {
        attempts: u32,
        #[source]
        source: ApiError,
    },
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Thing name; also the `<device_name>` segment of command topics
    pub device_name: String,
    pub command_namespace: String,
    pub heartbeat: HeartbeatSettings,
    /// Wait after connecting before the first health sample
    pub startup_delay: Duration,
    pub delete_timeout: Duration,
    pub bootstrap_attempts: u32,
    /// First retry delay of the bootstrap sample, doubled per attempt
    pub bootstrap_backoff: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            device_name: "device".to_string(),
            command_namespace: "vibration".to_string(),
            heartbeat: HeartbeatSettings::default(),
            startup_delay: Duration::ZERO,
            delete_timeout: Duration::from_secs(10),
            bootstrap_attempts: 5,
            bootstrap_backoff: Duration::from_millis(500),
        }
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum AgentState {
    Bootstrapping,
    Running,
    Stopped,
}

#[machine]
pub struct SyncAgent<S: AgentState> {
    settings: AgentSettings,
    transport: Arc<dyn MessageTransport>,
    api: Arc<dyn DeviceApi>,
    registry: SharedRegistry,
    fleet: ShadowFleet,
    device: Option<Arc<ShadowChannel>>,
    router: Option<Arc<CommandRouter>>,
    heartbeat: Option<HeartbeatHandle>,
}

impl<S: AgentState> SyncAgent<S> {
    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn fleet(&self) -> &ShadowFleet {
        &self.fleet
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn device(&self) -> Option<&Arc<ShadowChannel>> {
        self.device.as_ref()
    }
}

impl SyncAgent<Bootstrapping> {
    pub fn create(
        settings: AgentSettings,
        transport: Arc<dyn MessageTransport>,
        api: Arc<dyn DeviceApi>,
    ) -> Self {
        info!("Creating sync agent for {}", settings.device_name);

        Self::new(
            settings,
            transport,
            api,
            Arc::new(RwLock::new(SensorRegistry::default())),
            ShadowFleet::new(),
            None, // device
            None, // router
            None, // heartbeat
        )
    }

    /// Runs the startup sequence and transitions to Running
    ///
    /// Fails when the transport cannot connect, the device shadow cannot
    /// subscribe, no health sample can be taken, or the command subscription
    /// is rejected. A sensor shadow that fails to subscribe is skipped.
    pub async fn start(mut self) -> Result<SyncAgent<Running>, AgentError> {
        if let Err(e) = self.bring_up().await {
            error!("Startup failed: {}", e);
            if let Some(mut heartbeat) = self.heartbeat.take() {
                heartbeat.stop().await;
            }
            if let Err(e) = self.transport.disconnect().await {
                warn!("Disconnect after failed startup: {}", e);
            }
            return Err(e);
        }
        info!("Sync agent running for {}", self.settings.device_name);
        Ok(self.transition())
    }

    async fn bring_up(&mut self) -> Result<(), AgentError> {
        self.transport.connect().await?;

        if !self.settings.startup_delay.is_zero() {
            info!("Waiting {:?} for the device API", self.settings.startup_delay);
            tokio::time::sleep(self.settings.startup_delay).await;
        }

        let device = Arc::new(
            ShadowChannel::new(
                self.transport.clone(),
                ShadowName::new(&self.settings.device_name, DEVICE_SHADOW),
                device_table(self.api.clone(), self.registry.clone()),
                self.settings.delete_timeout,
            )
            .with_initial_state(initial_state(json!({"device_id": null, "sensors": []}))),
        );
        device.subscribe().await?;
        self.device = Some(device.clone());

        let health = self.bootstrap_sample().await?;
        let sync = Arc::new(HealthSync::new(
            self.api.clone(),
            device,
            self.registry.clone(),
            self.fleet.clone(),
        ));
        sync.apply(&health, true).await;

        let sensors = self.registry.read().await.records().to_vec();
        for sensor in &sensors {
            self.start_sensor(sensor).await;
        }
        info!(
            "{} of {} sensor shadows live",
            self.fleet.len().await,
            sensors.len()
        );

        let router = Arc::new(CommandRouter::new(
            self.transport.clone(),
            self.api.clone(),
            self.fleet.clone(),
            sync.clone(),
            &self.settings.command_namespace,
            &self.settings.device_name,
        ));
        router.subscribe().await?;
        self.router = Some(router);

        self.heartbeat = Some(HeartbeatScheduler::spawn(
            sync,
            self.settings.heartbeat.clone(),
        ));
        Ok(())
    }

    async fn bootstrap_sample(&self) -> Result<Health, AgentError> {
        let attempts = self.settings.bootstrap_attempts.max(1);
        let mut backoff = self.settings.bootstrap_backoff;

        let mut attempt = 1;
        loop {
            match self.api.health().await {
                Ok(health) => {
                    debug!("Bootstrap sample taken on attempt {}", attempt);
                    return Ok(health);
                }
                Err(e) if attempt >= attempts => {
                    return Err(AgentError::Bootstrap { attempts, source: e });
                }
                Err(e) => {
                    warn!(
                        "Health sample attempt {}/{} failed: {}, retrying in {:?}",
                        attempt, attempts, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }

    async fn start_sensor(&self, sensor: &SensorRecord) {
        if self.fleet.get(&sensor.sensor_id).await.is_some() {
            debug!("{}: shadow already live", sensor.sensor_id);
            return;
        }

        let channel = Arc::new(
            ShadowChannel::new(
                self.transport.clone(),
                ShadowName::new(&self.settings.device_name, &sensor.sensor_id),
                sensor_table(self.api.clone(), &sensor.sensor_id),
                self.settings.delete_timeout,
            )
            .with_initial_state(initial_state(json!({"active": null, "settings": null}))),
        );
        if let Err(e) = channel.subscribe().await {
            error!("{}: skipping sensor shadow: {}", sensor.sensor_id, e);
            return;
        }

        channel.set("active", Value::Bool(sensor.active)).await;
        match self.api.get_settings(&sensor.sensor_id).await {
            Ok(settings) => channel.set("settings", settings).await,
            Err(e) => error!("{}: could not fetch settings: {}", sensor.sensor_id, e),
        }
        channel.publish_update(true).await;

        self.fleet.insert(sensor.sensor_id.clone(), channel).await;
        info!("{}: sensor shadow live", sensor.sensor_id);
    }
}

impl SyncAgent<Running> {
    pub fn router(&self) -> Option<&Arc<CommandRouter>> {
        self.router.as_ref()
    }

    pub fn heartbeat_stats(&self) -> Option<HeartbeatStatsSnapshot> {
        self.heartbeat.as_ref().map(HeartbeatHandle::stats)
    }

    /// Tears everything down in reverse dependency order
    ///
    /// Failures along the way are logged; every step is still attempted.
    pub async fn shutdown(mut self) -> SyncAgent<Stopped> {
        info!("Shutting down sync agent for {}", self.settings.device_name);

        if let Some(mut heartbeat) = self.heartbeat.take() {
            heartbeat.stop().await;
        }
        if let Some(router) = self.router.take() {
            router.stop().await;
        }

        for (sensor_id, channel) in self.fleet.drain().await {
            if let Err(e) = channel.delete().await {
                error!("{}: failed to delete sensor shadow: {}", sensor_id, e);
            }
        }
        if let Some(device) = self.device.take() {
            if let Err(e) = device.delete().await {
                error!("Failed to delete device shadow: {}", e);
            }
        }

        if let Err(e) = self.transport.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
        info!("Sync agent stopped");
        self.transition()
    }
}

impl SyncAgent<Stopped> {}

fn initial_state(value: Value) -> StateMap {
    match value {
        Value::Object(map) => map,
        _ => StateMap::new(),
    }
}
