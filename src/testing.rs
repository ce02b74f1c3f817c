//! Recording test doubles for the transport and the device API

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::device_api::{ApiError, DeviceApi, Health, OperateAction};
use crate::mqtt::{Delivery, MessageHandler, MessageTransport, MqttMessage, MsgManager, TransportError};

/// Polls `check` until it holds, for at most one second
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Ordered log of calls shared between the fakes
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().expect("call log").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("call log").clone()
    }
}

#[derive(Debug)]
struct TransportState {
    connected: bool,
    subscriptions: Vec<String>,
    rejected: HashSet<String>,
    published: Vec<(String, Vec<u8>)>,
    attempts: Vec<String>,
    fail_publishes: bool,
    auto_ack_deletes: bool,
}

/// In-memory transport: records everything and answers delete requests
pub struct FakeTransport {
    state: Mutex<TransportState>,
    routes: MsgManager,
    log: CallLog,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::with_log(CallLog::default())
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            state: Mutex::new(TransportState {
                connected: false,
                subscriptions: Vec::new(),
                rejected: HashSet::new(),
                published: Vec::new(),
                attempts: Vec::new(),
                fail_publishes: false,
                auto_ack_deletes: true,
            }),
            routes: MsgManager::new(),
            log,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.state.lock().expect("transport state")
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn reject_filter(&self, filter: &str) {
        self.state().rejected.insert(filter.to_string());
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.state().fail_publishes = fail;
    }

    pub fn auto_ack_deletes(&self, enabled: bool) {
        self.state().auto_ack_deletes = enabled;
    }

    pub fn subscribed_filters(&self) -> Vec<String> {
        self.state().subscriptions.clone()
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.state().published.iter().map(|(t, _)| t.clone()).collect()
    }

    /// Successful publishes to `topic`, decoded as JSON
    pub fn published_to(&self, topic: &str) -> Vec<Value> {
        self.state()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| {
                serde_json::from_slice(payload)
                    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
            })
            .collect()
    }

    pub fn publish_attempts(&self, topic: &str) -> usize {
        self.state().attempts.iter().filter(|t| *t == topic).count()
    }

    /// Delivers a message as if it came from the broker
    pub async fn deliver(&self, topic: &str, payload: Value) {
        let msg = MqttMessage::from_topic(topic, payload.to_string().into_bytes());
        self.routes.distribute(msg).await;
    }
}

#[async_trait]
impl MessageTransport for FakeTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.log.record("connect");
        self.state().connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.log.record("disconnect");
        self.state().connected = false;
        Ok(())
    }

    async fn subscribe(&self, filter: &str, handler: MessageHandler) -> Result<(), TransportError> {
        self.log.record(format!("subscribe:{}", filter));
        {
            let mut state = self.state();
            if state.rejected.contains(filter) {
                return Err(TransportError::Rejected(filter.to_string()));
            }
            state.subscriptions.push(filter.to_string());
        }
        self.routes.register(filter, handler).await;
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _delivery: Delivery,
    ) -> Result<(), TransportError> {
        self.log.record(format!("publish:{}", topic));
        let auto_ack = {
            let mut state = self.state();
            state.attempts.push(topic.to_string());
            if state.fail_publishes {
                return Err(TransportError::Publish {
                    topic: topic.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
            state.published.push((topic.to_string(), payload.clone()));
            state.auto_ack_deletes
        };

        if auto_ack && topic.ends_with("/delete") {
            let request: Value = serde_json::from_slice(&payload).unwrap_or(Value::Null);
            self.deliver(
                &format!("{}/accepted", topic),
                json!({"clientToken": request["clientToken"], "version": 1}),
            )
            .await;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ApiState {
    health: Health,
    settings: HashMap<String, Value>,
    health_failures_left: usize,
    fail_settings: bool,
    fail_operate: bool,
    health_calls: usize,
    entered_calls: usize,
    operate_calls: Vec<(String, OperateAction)>,
    gate: Option<Arc<Semaphore>>,
}

/// Scriptable device API
pub struct FakeDeviceApi {
    state: Mutex<ApiState>,
    log: CallLog,
}

impl FakeDeviceApi {
    pub fn new() -> Self {
        Self::with_log(CallLog::default())
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            state: Mutex::new(ApiState::default()),
            log,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ApiState> {
        self.state.lock().expect("api state")
    }

    pub fn set_health(&self, health: Health) {
        self.state().health = health;
    }

    pub fn fail_health(&self, fail: bool) {
        self.state().health_failures_left = if fail { usize::MAX } else { 0 };
    }

    /// Fails the next `times` health samples
    pub fn fail_health_times(&self, times: usize) {
        self.state().health_failures_left = times;
    }

    pub fn set_settings(&self, sensor_id: &str, settings: Value) {
        self.state().settings.insert(sensor_id.to_string(), settings);
    }

    pub fn settings_of(&self, sensor_id: &str) -> Option<Value> {
        self.state().settings.get(sensor_id).cloned()
    }

    pub fn fail_settings(&self, fail: bool) {
        self.state().fail_settings = fail;
    }

    pub fn fail_operate(&self, fail: bool) {
        self.state().fail_operate = fail;
    }

    pub fn health_calls(&self) -> usize {
        self.state().health_calls
    }

    pub fn operate_calls(&self) -> Vec<(String, OperateAction)> {
        self.state().operate_calls.clone()
    }

    /// Calls that reached the API, including ones still held at the gate
    pub fn entered_calls(&self) -> usize {
        self.state().entered_calls
    }

    /// Holds every later call until the returned semaphore gets a permit per call
    pub fn hold_calls(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.state().gate = Some(gate.clone());
        gate
    }

    async fn enter(&self, entry: String) {
        self.log.record(entry);
        let gate = {
            let mut state = self.state();
            state.entered_calls += 1;
            state.gate.clone()
        };
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

#[async_trait]
impl DeviceApi for FakeDeviceApi {
    async fn health(&self) -> Result<Health, ApiError> {
        self.state().health_calls += 1;
        self.enter("api:health".to_string()).await;
        let mut state = self.state();
        if state.health_failures_left > 0 {
            state.health_failures_left -= 1;
            return Err(ApiError::Unavailable("health endpoint down".to_string()));
        }
        Ok(state.health.clone())
    }

    async fn get_settings(&self, sensor_id: &str) -> Result<Value, ApiError> {
        self.enter(format!("api:get_settings:{}", sensor_id)).await;
        let state = self.state();
        if state.fail_settings {
            return Err(ApiError::Unavailable("settings endpoint down".to_string()));
        }
        Ok(state.settings.get(sensor_id).cloned().unwrap_or_else(|| json!({})))
    }

    async fn put_settings(&self, sensor_id: &str, settings: &Value) -> Result<Value, ApiError> {
        self.enter(format!("api:put_settings:{}", sensor_id)).await;
        let mut state = self.state();
        if state.fail_settings {
            return Err(ApiError::Unavailable("settings endpoint down".to_string()));
        }
        state.settings.insert(sensor_id.to_string(), settings.clone());
        Ok(settings.clone())
    }

    async fn operate(&self, sensor_id: &str, action: OperateAction) -> Result<(), ApiError> {
        self.enter(format!("api:operate:{}:{}", sensor_id, action)).await;
        let mut state = self.state();
        if state.fail_operate {
            return Err(ApiError::Unavailable("control endpoint down".to_string()));
        }
        state.operate_calls.push((sensor_id.to_string(), action));
        Ok(())
    }
}
