//! Protocol handler for one named shadow
//!
//! # State Machine
//!
//! ```text
//! Unsubscribed ──► Subscribing ──► Synchronized ⇄ Publishing
//!                       │               │
//!                       ▼               ▼
//!                     Failed  ◄──── Deleting ──► Deleted
//! ```
//!
//! Every mutation of the channel's [`StateDocument`] goes through one async
//! mutex, so the heartbeat task and the inbound callback task never modify the
//! same shadow at the same time. Update publishes are fire-and-forget; only
//! [`ShadowChannel::delete`] waits for the remote store to answer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::document::{DocumentSnapshot, StateDocument, StateMap};
use super::messages::{
    DeleteRequest, DeleteResponse, DeltaEvent, ErrorResponse, UpdateRequest, UpdateResponse,
};
use super::reconcile::ReconcilerTable;
use super::topics::{ShadowTopic, ShadowTopics};
use super::ShadowError;
use crate::mqtt::{Delivery, MessageTransport, MqttMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unsubscribed,
    Subscribing,
    Synchronized,
    Publishing,
    Deleting,
    Deleted,
    Failed,
}

/// Addressing of a named shadow: `(thing, shadow)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShadowName {
    pub thing: String,
    pub shadow: String,
}

impl ShadowName {
    pub fn new(thing: impl Into<String>, shadow: impl Into<String>) -> Self {
        Self {
            thing: thing.into(),
            shadow: shadow.into(),
        }
    }
}

impl fmt::Display for ShadowName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.thing, self.shadow)
    }
}

#[derive(Debug, Default)]
struct ChannelStats {
    publishes: AtomicU64,
    publish_failures: AtomicU64,
    reconciliations: AtomicU64,
    self_echoes: AtomicU64,
    rejections: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatsSnapshot {
    pub publishes: u64,
    pub publish_failures: u64,
    pub reconciliations: u64,
    pub self_echoes: u64,
    pub rejections: u64,
}

#[derive(Debug)]
struct ChannelInner {
    document: StateDocument,
    state: ChannelState,
}

type DeleteWaiter = oneshot::Sender<Result<(), ShadowError>>;

pub struct ShadowChannel {
    name: ShadowName,
    topics: ShadowTopics,
    token: String,
    transport: Arc<dyn MessageTransport>,
    reconcilers: ReconcilerTable,
    inner: Mutex<ChannelInner>,
    pending_delete: Mutex<Option<DeleteWaiter>>,
    inbound_task: Mutex<Option<JoinHandle<()>>>,
    delete_timeout: Duration,
    stats: ChannelStats,
}

impl fmt::Debug for ShadowChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowChannel")
            .field("name", &self.name)
            .field("token", &self.token)
            .field("reconcilers", &self.reconcilers)
            .finish_non_exhaustive()
    }
}

impl ShadowChannel {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        name: ShadowName,
        reconcilers: ReconcilerTable,
        delete_timeout: Duration,
    ) -> Self {
        let topics = ShadowTopics::new(&name.thing, &name.shadow);
        let token = Uuid::new_v4().to_string();
        debug!("Created shadow channel {} with token {}", name, token);

        Self {
            name,
            topics,
            token,
            transport,
            reconcilers,
            inner: Mutex::new(ChannelInner {
                document: StateDocument::default(),
                state: ChannelState::Unsubscribed,
            }),
            pending_delete: Mutex::new(None),
            inbound_task: Mutex::new(None),
            delete_timeout,
            stats: ChannelStats::default(),
        }
    }

    pub fn with_initial_state(mut self, reported: StateMap) -> Self {
        self.inner.get_mut().document = StateDocument::new(reported);
        self
    }

    pub fn name(&self) -> &ShadowName {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn topics(&self) -> &ShadowTopics {
        &self.topics
    }

    pub async fn state(&self) -> ChannelState {
        self.inner.lock().await.state
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            publishes: self.stats.publishes.load(Ordering::Relaxed),
            publish_failures: self.stats.publish_failures.load(Ordering::Relaxed),
            reconciliations: self.stats.reconciliations.load(Ordering::Relaxed),
            self_echoes: self.stats.self_echoes.load(Ordering::Relaxed),
            rejections: self.stats.rejections.load(Ordering::Relaxed),
        }
    }

    /// Subscribes to the delete and update reply topics and starts the inbound task
    ///
    /// A rejected subscription leaves the channel in [`ChannelState::Failed`];
    /// retrying is up to the caller.
    pub async fn subscribe(self: &Arc<Self>) -> Result<(), ShadowError> {
        {
            let mut inner = self.inner.lock().await;
            if !matches!(inner.state, ChannelState::Unsubscribed | ChannelState::Failed) {
                return Err(ShadowError::InvalidState(inner.state));
            }
            inner.state = ChannelState::Subscribing;
        }

        info!("Subscribing to shadow topics of {}", self.name);
        let (tx, rx) = mpsc::unbounded_channel();
        for filter in self.topics.subscriptions() {
            if let Err(e) = self.transport.subscribe(&filter, tx.clone()).await {
                error!("{}: error subscribing to {}: {}", self.name, filter, e);
                self.inner.lock().await.state = ChannelState::Failed;
                return Err(e.into());
            }
        }

        let channel = Arc::clone(self);
        let handle = tokio::spawn(async move { channel.run_inbound(rx).await });
        *self.inbound_task.lock().await = Some(handle);

        self.inner.lock().await.state = ChannelState::Synchronized;
        info!("{}: subscribed to delete and update topics", self.name);
        Ok(())
    }

    async fn run_inbound(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<MqttMessage>) {
        while let Some(msg) = rx.recv().await {
            self.handle_message(&msg).await;
        }
        debug!("{}: inbound stream closed", self.name);
    }

    pub async fn handle_message(&self, msg: &MqttMessage) {
        let Some(kind) = self.topics.classify(&msg.topic) else {
            debug!("{}: ignoring message on {}", self.name, msg.topic);
            return;
        };

        match kind {
            ShadowTopic::UpdateAccepted => {
                if let Some(response) = self.decode::<UpdateResponse>(msg) {
                    self.on_update_accepted(response).await;
                }
            }
            ShadowTopic::UpdateRejected => {
                if let Some(response) = self.decode::<ErrorResponse>(msg) {
                    self.on_update_rejected(response);
                }
            }
            ShadowTopic::UpdateDelta => {
                if let Some(event) = self.decode::<DeltaEvent>(msg) {
                    self.on_delta(event).await;
                }
            }
            ShadowTopic::DeleteAccepted => {
                if let Some(response) = self.decode::<DeleteResponse>(msg) {
                    self.on_delete_accepted(response).await;
                }
            }
            ShadowTopic::DeleteRejected => {
                if let Some(response) = self.decode::<ErrorResponse>(msg) {
                    self.on_delete_rejected(response).await;
                }
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, msg: &MqttMessage) -> Option<T> {
        match serde_json::from_slice(&msg.payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("{}: dropping malformed message on {}: {}", self.name, msg.topic, e);
                None
            }
        }
    }

    pub async fn merge(&self, partial: StateMap) {
        self.inner.lock().await.document.merge(partial);
    }

    pub async fn set(&self, key: &str, value: Value) {
        let mut inner = self.inner.lock().await;
        inner.document.set(key, value);
        debug!("{}: updated state for {}", self.name, key);
    }

    pub async fn reported_value(&self, key: &str) -> Option<Value> {
        self.inner.lock().await.document.get(key).cloned()
    }

    pub async fn snapshot(&self) -> DocumentSnapshot {
        self.inner.lock().await.document.snapshot()
    }

    /// Publishes the reported half, plus desired when `override_desired` is set
    ///
    /// Transport failures are logged and counted, never retried here; the next
    /// heartbeat or explicit publish carries the state again.
    pub async fn publish_update(&self, override_desired: bool) {
        let (snapshot, previous) = {
            let mut inner = self.inner.lock().await;
            if matches!(inner.state, ChannelState::Deleting | ChannelState::Deleted) {
                debug!("{}: skipping update, shadow is being deleted", self.name);
                return;
            }
            if override_desired {
                inner.document.override_desired();
            }
            let mut snapshot = inner.document.snapshot();
            if !override_desired {
                snapshot.desired = None;
            }
            let previous = inner.state;
            inner.state = ChannelState::Publishing;
            (snapshot, previous)
        };

        debug!("{}: sending new state", self.name);
        let request = UpdateRequest {
            state: snapshot.into_state(),
            client_token: self.token.clone(),
        };
        let result = match serde_json::to_vec(&request) {
            Ok(payload) => self
                .transport
                .publish(&self.topics.update(), payload, Delivery::AtLeastOnce)
                .await
                .map_err(ShadowError::from),
            Err(e) => Err(e.into()),
        };

        {
            let mut inner = self.inner.lock().await;
            if inner.state == ChannelState::Publishing {
                inner.state = match previous {
                    ChannelState::Publishing => ChannelState::Synchronized,
                    other => other,
                };
            }
        }

        match result {
            Ok(()) => {
                self.stats.publishes.fetch_add(1, Ordering::Relaxed);
                debug!("{}: state update publish successful", self.name);
            }
            Err(e) => {
                self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                error!("{}: update publish failed: {}", self.name, e);
            }
        }
    }

    pub async fn on_update_accepted(&self, response: UpdateResponse) {
        if let Some(version) = response.version {
            self.inner.lock().await.document.observe_version(version);
        }

        if response.client_token.as_deref() == Some(self.token.as_str()) {
            self.stats.self_echoes.fetch_add(1, Ordering::Relaxed);
            debug!(
                "{}: update accepted (own write, version {:?})",
                self.name, response.version
            );
            return;
        }

        match response.state.desired {
            Some(desired) if !desired.is_empty() => {
                info!("{}: desired state changed by another client", self.name);
                self.apply_desired(desired).await;
            }
            _ => debug!("{}: update accepted for another client", self.name),
        }
    }

    pub fn on_update_rejected(&self, response: ErrorResponse) {
        self.stats.rejections.fetch_add(1, Ordering::Relaxed);
        error!(
            "{}: update rejected (code {}): {}",
            self.name, response.code, response.message
        );
    }

    pub async fn on_delta(&self, event: DeltaEvent) {
        if let Some(version) = event.version {
            self.inner.lock().await.document.observe_version(version);
        }
        if event.state.is_empty() {
            debug!("{}: empty delta", self.name);
            return;
        }
        info!("{}: received state delta", self.name);
        self.apply_desired(event.state).await;
    }

    /// Runs the registered reconciler for every desired key that differs from
    /// reported, then always re-publishes reported. Returns how many keys were applied.
    async fn apply_desired(&self, desired: StateMap) -> usize {
        let applied = {
            let mut inner = self.inner.lock().await;
            if matches!(inner.state, ChannelState::Deleting | ChannelState::Deleted) {
                debug!("{}: ignoring desired state while deleting", self.name);
                return 0;
            }

            let mut applied = 0;
            for (key, value) in desired.iter() {
                if !inner.document.differs(key, value) {
                    debug!("{}: '{}' already in sync", self.name, key);
                    continue;
                }
                let Some(reconciler) = self.reconcilers.get(key) else {
                    debug!("{}: no handler for '{}', ignoring", self.name, key);
                    continue;
                };

                let outcome = reconciler.reconcile(value, inner.document.get(key)).await;
                self.stats.reconciliations.fetch_add(1, Ordering::Relaxed);
                if let Some(reported) = outcome.reported {
                    inner.document.set(key.as_str(), reported);
                    applied += 1;
                }
                if let Some(reason) = outcome.error {
                    error!("{}: reconciling '{}' failed: {}", self.name, key, reason);
                }
            }
            applied
        };

        self.publish_update(false).await;
        applied
    }

    async fn on_delete_accepted(&self, response: DeleteResponse) {
        if !self.owns(response.client_token.as_deref()) {
            debug!("{}: delete accepted for another client", self.name);
            return;
        }
        match self.pending_delete.lock().await.take() {
            Some(waiter) => {
                let _ = waiter.send(Ok(()));
            }
            None => info!("Shadow {} deleted", self.name),
        }
    }

    async fn on_delete_rejected(&self, response: ErrorResponse) {
        self.stats.rejections.fetch_add(1, Ordering::Relaxed);
        error!(
            "{}: delete rejected (code {}): {}",
            self.name, response.code, response.message
        );
        if !self.owns(response.client_token.as_deref()) {
            return;
        }
        if let Some(waiter) = self.pending_delete.lock().await.take() {
            let _ = waiter.send(Err(ShadowError::Rejected {
                code: response.code,
                message: response.message,
            }));
        }
    }

    fn owns(&self, token: Option<&str>) -> bool {
        token.map_or(true, |t| t == self.token)
    }

    /// Deletes the shadow and waits until the remote store confirms or rejects it
    pub async fn delete(&self) -> Result<(), ShadowError> {
        {
            let mut inner = self.inner.lock().await;
            match inner.state {
                ChannelState::Deleted => return Ok(()),
                ChannelState::Deleting => return Err(ShadowError::InvalidState(inner.state)),
                _ => inner.state = ChannelState::Deleting,
            }
        }

        info!("{}: deleting shadow", self.name);
        let (tx, rx) = oneshot::channel();
        *self.pending_delete.lock().await = Some(tx);

        let outcome = self.request_delete(rx).await;
        self.pending_delete.lock().await.take();

        match outcome {
            Ok(()) => {
                self.inner.lock().await.state = ChannelState::Deleted;
                if let Some(handle) = self.inbound_task.lock().await.take() {
                    handle.abort();
                }
                info!("Shadow {} successfully deleted", self.name);
                Ok(())
            }
            Err(e) => {
                self.inner.lock().await.state = ChannelState::Failed;
                error!("{}: delete failed: {}", self.name, e);
                Err(e)
            }
        }
    }

    async fn request_delete(
        &self,
        rx: oneshot::Receiver<Result<(), ShadowError>>,
    ) -> Result<(), ShadowError> {
        let payload = serde_json::to_vec(&DeleteRequest {
            client_token: self.token.clone(),
        })?;
        self.transport
            .publish(&self.topics.delete(), payload, Delivery::AtLeastOnce)
            .await?;

        match tokio::time::timeout(self.delete_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ShadowError::Closed),
            Err(_) => Err(ShadowError::DeleteTimeout(self.delete_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::reconcile::{Reconciled, Reconciler};
    use crate::testing::{eventually, FakeTransport};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingReconciler {
        calls: StdMutex<Vec<Value>>,
        fail: bool,
    }

    #[async_trait]
    impl Reconciler for RecordingReconciler {
        async fn reconcile(&self, desired: &Value, _reported: Option<&Value>) -> Reconciled {
            self.calls.lock().expect("lock").push(desired.clone());
            if self.fail {
                Reconciled::failed("device unreachable")
            } else {
                Reconciled::applied(desired.clone())
            }
        }
    }

    impl RecordingReconciler {
        fn calls(&self) -> Vec<Value> {
            self.calls.lock().expect("lock").clone()
        }
    }

    fn map(value: Value) -> StateMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    async fn channel_with(
        transport: &Arc<FakeTransport>,
        reconciler: Arc<RecordingReconciler>,
    ) -> Arc<ShadowChannel> {
        let table = ReconcilerTable::new().with("active", reconciler);
        let channel = Arc::new(
            ShadowChannel::new(
                transport.clone(),
                ShadowName::new("dev1", "sensorA"),
                table,
                Duration::from_millis(500),
            )
            .with_initial_state(map(json!({"active": false, "settings": null}))),
        );
        channel.subscribe().await.expect("subscribed");
        channel
    }

    #[tokio::test]
    async fn subscribe_covers_delete_and_update_topics() {
        let transport = Arc::new(FakeTransport::new());
        let channel = channel_with(&transport, Arc::default()).await;

        let filters = transport.subscribed_filters();
        for expected in channel.topics().subscriptions() {
            assert!(filters.contains(&expected), "missing {}", expected);
        }
        assert_eq!(filters.len(), 5);
        assert_eq!(channel.state().await, ChannelState::Synchronized);
    }

    #[tokio::test]
    async fn rejected_subscription_fails_the_channel() {
        let transport = Arc::new(FakeTransport::new());
        transport.reject_filter("$aws/things/dev1/shadow/name/sensorA/update/delta");
        let channel = Arc::new(ShadowChannel::new(
            transport.clone(),
            ShadowName::new("dev1", "sensorA"),
            ReconcilerTable::new(),
            Duration::from_millis(500),
        ));

        assert!(channel.subscribe().await.is_err());
        assert_eq!(channel.state().await, ChannelState::Failed);
    }

    #[tokio::test]
    async fn publish_carries_token_and_optional_desired() {
        let transport = Arc::new(FakeTransport::new());
        let channel = channel_with(&transport, Arc::default()).await;

        channel.publish_update(true).await;
        channel.publish_update(false).await;

        let updates = transport.published_to(&channel.topics().update());
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0]["clientToken"], json!(channel.token()));
        assert_eq!(updates[0]["state"]["desired"], updates[0]["state"]["reported"]);
        assert!(updates[1]["state"].get("desired").is_none());
    }

    #[tokio::test]
    async fn publish_failure_is_logged_not_retried() {
        let transport = Arc::new(FakeTransport::new());
        let channel = channel_with(&transport, Arc::default()).await;
        transport.fail_publishes(true);

        channel.publish_update(false).await;

        assert_eq!(channel.stats().publish_failures, 1);
        assert_eq!(transport.publish_attempts(&channel.topics().update()), 1);
        assert_eq!(channel.state().await, ChannelState::Synchronized);
    }

    #[tokio::test]
    async fn delta_runs_reconciler_and_republishes() {
        let transport = Arc::new(FakeTransport::new());
        let reconciler = Arc::new(RecordingReconciler::default());
        let channel = channel_with(&transport, reconciler.clone()).await;

        channel
            .on_delta(DeltaEvent {
                state: map(json!({"active": true, "unknown": 1})),
                version: Some(3),
            })
            .await;

        assert_eq!(reconciler.calls(), vec![json!(true)]);
        assert_eq!(channel.reported_value("active").await, Some(json!(true)));
        assert_eq!(channel.reported_value("unknown").await, None);
        assert_eq!(channel.snapshot().await.version, Some(3));
        let updates = transport.published_to(&channel.topics().update());
        assert_eq!(updates.last().map(|u| u["state"]["reported"]["active"].clone()), Some(json!(true)));
    }

    #[tokio::test]
    async fn repeated_delta_is_applied_once() {
        let transport = Arc::new(FakeTransport::new());
        let reconciler = Arc::new(RecordingReconciler::default());
        let channel = channel_with(&transport, reconciler.clone()).await;
        let delta = DeltaEvent {
            state: map(json!({"active": true})),
            version: None,
        };

        channel.on_delta(delta.clone()).await;
        let after_first = channel.snapshot().await.reported;
        channel.on_delta(delta).await;

        assert_eq!(reconciler.calls().len(), 1);
        assert_eq!(channel.snapshot().await.reported, after_first);
    }

    #[tokio::test]
    async fn failed_reconcile_keeps_reported_but_still_publishes() {
        let transport = Arc::new(FakeTransport::new());
        let reconciler = Arc::new(RecordingReconciler {
            fail: true,
            ..Default::default()
        });
        let channel = channel_with(&transport, reconciler).await;

        channel
            .on_delta(DeltaEvent {
                state: map(json!({"active": true})),
                version: None,
            })
            .await;

        assert_eq!(channel.reported_value("active").await, Some(json!(false)));
        assert_eq!(transport.published_to(&channel.topics().update()).len(), 1);
    }

    #[tokio::test]
    async fn own_accepted_update_is_not_reconciled() {
        let transport = Arc::new(FakeTransport::new());
        let reconciler = Arc::new(RecordingReconciler::default());
        let channel = channel_with(&transport, reconciler.clone()).await;

        transport
            .deliver(
                &channel.topics().update_accepted(),
                json!({
                    "state": {"desired": {"active": true}},
                    "clientToken": channel.token(),
                    "version": 2
                }),
            )
            .await;

        assert!(eventually(|| async { channel.stats().self_echoes == 1 }).await);
        assert!(reconciler.calls().is_empty());
        assert_eq!(channel.reported_value("active").await, Some(json!(false)));
    }

    #[tokio::test]
    async fn foreign_accepted_update_with_desired_is_reconciled() {
        let transport = Arc::new(FakeTransport::new());
        let reconciler = Arc::new(RecordingReconciler::default());
        let channel = channel_with(&transport, reconciler.clone()).await;

        transport
            .deliver(
                &channel.topics().update_accepted(),
                json!({"state": {"desired": {"active": true}}, "clientToken": "console"}),
            )
            .await;

        assert!(eventually(|| async { reconciler.calls().len() == 1 }).await);
        assert!(eventually(|| async {
            channel.reported_value("active").await == Some(json!(true))
        })
        .await);
    }

    #[tokio::test]
    async fn malformed_delta_is_dropped() {
        let transport = Arc::new(FakeTransport::new());
        let reconciler = Arc::new(RecordingReconciler::default());
        let channel = channel_with(&transport, reconciler.clone()).await;

        channel
            .handle_message(&MqttMessage::from_topic(
                channel.topics().update_delta(),
                b"not json".to_vec(),
            ))
            .await;

        assert!(reconciler.calls().is_empty());
        assert!(transport.published_to(&channel.topics().update()).is_empty());
    }

    #[tokio::test]
    async fn delete_waits_for_acceptance() {
        let transport = Arc::new(FakeTransport::new());
        let channel = channel_with(&transport, Arc::default()).await;

        channel.delete().await.expect("deleted");

        assert_eq!(channel.state().await, ChannelState::Deleted);
        let deletes = transport.published_to(&channel.topics().delete());
        assert_eq!(deletes, vec![json!({"clientToken": channel.token()})]);

        channel.publish_update(false).await;
        assert!(transport.published_to(&channel.topics().update()).is_empty());
    }

    #[tokio::test]
    async fn delete_without_answer_times_out() {
        let transport = Arc::new(FakeTransport::new());
        transport.auto_ack_deletes(false);
        let channel = channel_with(&transport, Arc::default()).await;

        let result = channel.delete().await;

        assert!(matches!(result, Err(ShadowError::DeleteTimeout(_))));
        assert_eq!(channel.state().await, ChannelState::Failed);
    }

    #[tokio::test]
    async fn rejected_delete_is_reported() {
        let transport = Arc::new(FakeTransport::new());
        transport.auto_ack_deletes(false);
        let channel = channel_with(&transport, Arc::default()).await;

        let deleting = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.delete().await })
        };
        assert!(eventually(|| async {
            !transport.published_to(&channel.topics().delete()).is_empty()
        })
        .await);
        transport
            .deliver(
                &channel.topics().delete_rejected(),
                json!({"code": 404, "message": "No shadow exists", "clientToken": channel.token()}),
            )
            .await;

        let result = deleting.await.expect("task");
        assert!(matches!(result, Err(ShadowError::Rejected { code: 404, .. })));
    }
}
