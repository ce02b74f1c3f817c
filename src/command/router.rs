use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::envelope::{parse_command_topic, CommandAddress, CommandEnvelope, CommandOutcome};
use crate::device_api::{DeviceApi, OperateAction};
use crate::heartbeat::HealthSync;
use crate::mqtt::{Delivery, MessageTransport, MqttMessage, TransportError};
use crate::sensors::{SensorChange, ShadowFleet};

/// Handler selected by the last segment of a command topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Settings,
    Operate,
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "settings" => Ok(CommandKind::Settings),
            "operate" => Ok(CommandKind::Operate),
            other => Err(format!("Unknown action {}", other)),
        }
    }
}

/// A result ready to be published
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub topic: String,
    pub outcome: CommandOutcome,
}

#[derive(Debug, Default)]
struct RouterStats {
    received: AtomicU64,
    dropped: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub received: u64,
    pub dropped: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Routes `cmd/<namespace>/<device>/<sensor_id>/<action>` messages to the
/// device API and answers on the response topic
///
/// Malformed topics and payloads are dropped with a log line. Everything
/// else gets exactly one reply, including unknown actions and unknown sensors.
/// Successful commands are written back into the sensor shadow, the sensor
/// registry and the device shadow through [`HealthSync::record_change`].
pub struct CommandRouter {
    transport: Arc<dyn MessageTransport>,
    api: Arc<dyn DeviceApi>,
    fleet: ShadowFleet,
    sync: Arc<HealthSync>,
    namespace: String,
    device_name: String,
    stats: RouterStats,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRouter")
            .field("namespace", &self.namespace)
            .field("device_name", &self.device_name)
            .finish_non_exhaustive()
    }
}

impl CommandRouter {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        api: Arc<dyn DeviceApi>,
        fleet: ShadowFleet,
        sync: Arc<HealthSync>,
        namespace: impl Into<String>,
        device_name: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            api,
            fleet,
            sync,
            namespace: namespace.into(),
            device_name: device_name.into(),
            stats: RouterStats::default(),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn command_filter(&self) -> String {
        format!("cmd/{}/{}/+/+", self.namespace, self.device_name)
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            received: self.stats.received.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    pub async fn subscribe(self: &Arc<Self>) -> Result<(), TransportError> {
        let filter = self.command_filter();
        let (tx, rx) = mpsc::unbounded_channel();
        self.transport.subscribe(&filter, tx).await?;
        info!("Listening for commands on {}", filter);

        let router = Arc::clone(self);
        let handle = tokio::spawn(async move { router.run(rx).await });
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    /// Stops taking new commands and waits for the one being handled to be answered
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Command router task ended abnormally: {}", e);
            }
            info!("Command router stopped");
        }
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<MqttMessage>) {
        loop {
            let msg = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => {
                        debug!("Command stream closed");
                        break;
                    }
                },
            };
            self.handle_message(&msg).await;
        }
    }

    pub async fn handle_message(&self, msg: &MqttMessage) {
        let Some(reply) = self.route(&msg.topic, &msg.payload).await else {
            return;
        };

        let payload = match serde_json::to_vec(&reply.outcome.to_value()) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode command response: {}", e);
                return;
            }
        };
        match self
            .transport
            .publish(&reply.topic, payload, Delivery::AtLeastOnce)
            .await
        {
            Ok(()) => debug!("Response published to {}", reply.topic),
            Err(e) => error!("Failed to publish response to {}: {}", reply.topic, e),
        }
    }

    /// Parses and executes one command; `None` when the message is dropped
    pub async fn route(&self, topic: &str, payload: &[u8]) -> Option<CommandReply> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let Some(address) = parse_command_topic(topic, &self.namespace) else {
            warn!("Dropping command with malformed topic {}", topic);
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        let envelope = match CommandEnvelope::parse(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping command on {} with malformed payload: {}", topic, e);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let response_topic = envelope.response_topic_for(topic);
        info!("Command {} ({}) received", address, envelope.action);
        let outcome = self.dispatch(&address, &envelope).await;

        if outcome.is_success() {
            self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
        }
        Some(CommandReply {
            topic: response_topic,
            outcome,
        })
    }

    async fn dispatch(&self, address: &CommandAddress, envelope: &CommandEnvelope) -> CommandOutcome {
        let kind = match address.action.parse::<CommandKind>() {
            Ok(kind) => kind,
            Err(reason) => {
                warn!("{}: {}", address.target_id, reason);
                return CommandOutcome::failed(reason);
            }
        };
        if self.fleet.get(&address.target_id).await.is_none() {
            warn!("Command for unknown sensor {}", address.target_id);
            return CommandOutcome::failed(format!("Unknown sensor {}", address.target_id));
        }

        match kind {
            CommandKind::Settings => self.settings(&address.target_id, envelope).await,
            CommandKind::Operate => self.operate(&address.target_id, envelope).await,
        }
    }

    async fn settings(&self, sensor_id: &str, envelope: &CommandEnvelope) -> CommandOutcome {
        let result = match (envelope.action.as_str(), envelope.body.as_ref()) {
            (_, Some(body)) => self.api.put_settings(sensor_id, body).await,
            ("get", None) => self.api.get_settings(sensor_id).await,
            ("set" | "update", None) => {
                return CommandOutcome::failed("Missing settings body");
            }
            (other, None) => {
                return CommandOutcome::failed(format!("Unsupported settings action {}", other));
            }
        };

        match result {
            Ok(settings) => {
                self.sync
                    .record_change(sensor_id, SensorChange::Settings(settings.clone()))
                    .await;
                CommandOutcome::Document(settings)
            }
            Err(e) => {
                error!("{}: settings request failed: {}", sensor_id, e);
                CommandOutcome::failed(e.to_string())
            }
        }
    }

    async fn operate(&self, sensor_id: &str, envelope: &CommandEnvelope) -> CommandOutcome {
        let action = match envelope.action.parse::<OperateAction>() {
            Ok(action) => action,
            Err(reason) => return CommandOutcome::failed(reason),
        };

        match self.api.operate(sensor_id, action).await {
            Ok(()) => {
                info!("{}: {} succeeded", sensor_id, action);
                self.sync
                    .record_change(sensor_id, SensorChange::Active(action.active()))
                    .await;
                CommandOutcome::success()
            }
            Err(e) => {
                error!("{}: operate request failed: {}", sensor_id, e);
                CommandOutcome::failed(e.to_string())
            }
        }
    }
}
