//! rumqttc-backed [`MessageTransport`]
//!
//! The handler owns the rumqttc event loop on a dedicated tokio task. Besides
//! forwarding inbound publishes to the [`MsgManager`], the loop correlates
//! SubAck packets with the subscribe call that caused them so that
//! `subscribe()` only resolves once the broker has accepted the filter.
//!
//! # Connection Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──ConnAck──► Connected
//!                                 │                      │  ▲
//!                              (error)               (error) │ ConnAck
//!                                 ▼                      ▼  │ (resubscribe if no session)
//!                               Failed               Reconnecting
//! ```
//!
//! A broker that rejects one of the re-issued subscriptions after a reconnect
//! publishes a fatal event on [`MqttHandler::fatal_events`]; the process is
//! expected to exit because the twins can no longer be trusted to reconcile.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnAck, Event, EventLoop, MqttOptions, Outgoing, Packet, SubAck,
    SubscribeReasonCode, TlsConfiguration, Transport,
};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{MqttConfig, TlsConfig};
use super::message_manager::{MessageHandler, MqttMessage, MsgManager};
use super::{Delivery, MessageTransport, TransportError};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);
const MAX_ERROR_MESSAGES: usize = 20;

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MQTTStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

impl MQTTStatus {
    fn record_error(&mut self, message: String) {
        if self.error_messages.len() >= MAX_ERROR_MESSAGES {
            self.error_messages.remove(0);
        }
        self.error_messages.push(message);
    }
}

type SubscribeWaiter = oneshot::Sender<Result<(), TransportError>>;

#[derive(Debug)]
struct PendingSubscription {
    filter: String,
    waiter: Option<SubscribeWaiter>,
    // Re-issued after reconnect: a rejection here cannot be recovered from
    fatal_on_reject: bool,
}

/// Matches outgoing SUBSCRIBE packet ids to the callers waiting on their SubAck
///
/// Requests leave the client in the order they were queued, so the next
/// `Outgoing::Subscribe(pkid)` always belongs to the oldest queued entry.
#[derive(Debug, Default)]
struct SubAckTracker {
    queued: VecDeque<PendingSubscription>,
    in_flight: HashMap<u16, PendingSubscription>,
}

impl SubAckTracker {
    fn enqueue(&mut self, pending: PendingSubscription) {
        self.queued.push_back(pending);
    }

    fn assign(&mut self, pkid: u16) {
        if self.in_flight.contains_key(&pkid) {
            // retransmission of a SUBSCRIBE we are already tracking
            return;
        }
        if let Some(pending) = self.queued.pop_front() {
            self.in_flight.insert(pkid, pending);
        }
    }

    /// Forgets sent subscriptions whose caller gave up waiting
    ///
    /// Queued entries stay so the pairing order of outgoing packet ids holds.
    fn drop_abandoned(&mut self) {
        self.in_flight.retain(|pkid, pending| {
            let abandoned = pending.waiter.as_ref().is_some_and(|w| w.is_closed());
            if abandoned {
                debug!("Dropping abandoned subscription {} (packet {})", pending.filter, pkid);
            }
            !abandoned
        });
    }

    fn resolve(&mut self, ack: &SubAck) -> Option<(PendingSubscription, bool)> {
        let pending = self.in_flight.remove(&ack.pkid)?;
        let accepted = ack
            .return_codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)));
        Some((pending, accepted))
    }
}

struct Shared {
    client: AsyncClient,
    routes: MsgManager,
    tracker: Mutex<SubAckTracker>,
    status: Mutex<MQTTStatus>,
    fatal_tx: watch::Sender<Option<String>>,
    qos: rumqttc::QoS,
}

impl Shared {
    async fn set_state(&self, state: ConnectionState) {
        let mut status = self.status.lock().await;
        if status.connection_state != state {
            debug!("MQTT connection state {:?} -> {:?}", status.connection_state, state);
            status.connection_state = state;
        }
    }

    async fn request_subscription(
        &self,
        filter: &str,
        waiter: Option<SubscribeWaiter>,
        fatal_on_reject: bool,
    ) -> Result<(), TransportError> {
        let mut tracker = self.tracker.lock().await;
        tracker.enqueue(PendingSubscription {
            filter: filter.to_string(),
            waiter,
            fatal_on_reject,
        });
        if let Err(e) = self.client.try_subscribe(filter, self.qos) {
            tracker.queued.pop_back();
            return Err(TransportError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    async fn fatal(&self, reason: String) {
        error!("Fatal transport condition: {}", reason);
        self.status.lock().await.record_error(reason.clone());
        self.fatal_tx.send_replace(Some(reason));
    }
}

/// MQTT transport backed by a rumqttc [`AsyncClient`]
pub struct MqttHandler {
    shared: Arc<Shared>,
    eventloop: Mutex<Option<EventLoop>>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    connect_timeout: Duration,
    subscribe_timeout: Duration,
}

impl MqttHandler {
    pub fn new(config: &MqttConfig, client_id: &str) -> Result<Self, TransportError> {
        let mut mqtt_options = MqttOptions::new(client_id, config.host.clone(), config.port);
        mqtt_options
            .set_keep_alive(Duration::from_secs(config.keep_alive_secs))
            .set_clean_session(config.clean_session);

        if let Some(tls) = &config.tls {
            mqtt_options.set_transport(Transport::tls_with_config(load_tls(tls)?));
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, config.request_capacity);
        let (fatal_tx, _) = watch::channel(None);

        info!(
            "MQTT transport configured for {}:{} as '{}'",
            config.host, config.port, client_id
        );

        Ok(Self {
            shared: Arc::new(Shared {
                client,
                routes: MsgManager::new(),
                tracker: Mutex::new(SubAckTracker::default()),
                status: Mutex::new(MQTTStatus::default()),
                fatal_tx,
                qos: Delivery::AtLeastOnce.into(),
            }),
            eventloop: Mutex::new(Some(eventloop)),
            task_handle: Mutex::new(None),
            shutdown: CancellationToken::new(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            subscribe_timeout: Duration::from_secs(config.subscribe_timeout_secs),
        })
    }

    /// Fires with a reason when a subscription is rejected after reconnect
    pub fn fatal_events(&self) -> watch::Receiver<Option<String>> {
        self.shared.fatal_tx.subscribe()
    }

    pub async fn status(&self) -> MQTTStatus {
        self.shared.status.lock().await.clone()
    }
}

#[async_trait]
impl MessageTransport for MqttHandler {
    async fn connect(&self) -> Result<(), TransportError> {
        let Some(eventloop) = self.eventloop.lock().await.take() else {
            debug!("MQTT event loop already running");
            return Ok(());
        };

        self.shared.set_state(ConnectionState::Connecting).await;
        let (connected_tx, connected_rx) = oneshot::channel();
        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            run_event_loop(eventloop, shared, shutdown, connected_tx).await;
        });
        *self.task_handle.lock().await = Some(handle);

        match tokio::time::timeout(self.connect_timeout, connected_rx).await {
            Ok(Ok(Ok(()))) => {
                info!("Connected to MQTT broker");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(TransportError::Connect(
                "event loop stopped before connecting".to_string(),
            )),
            Err(_) => {
                self.shutdown.cancel();
                self.shared.set_state(ConnectionState::Failed).await;
                Err(TransportError::Timeout("broker ConnAck".to_string()))
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(mut handle) = self.task_handle.lock().await.take() else {
            return Ok(());
        };

        info!("Disconnecting from MQTT broker");
        let result = self
            .shared
            .client
            .disconnect()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()));

        if tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await.is_err() {
            warn!("MQTT event loop did not stop in time, cancelling");
            self.shutdown.cancel();
            handle.abort();
        }
        self.shared.set_state(ConnectionState::Disconnected).await;
        result
    }

    async fn subscribe(&self, filter: &str, handler: MessageHandler) -> Result<(), TransportError> {
        self.shared.routes.register(filter, handler).await;

        let (ack_tx, ack_rx) = oneshot::channel();
        self.shared
            .request_subscription(filter, Some(ack_tx), false)
            .await?;

        let acked = tokio::time::timeout(self.subscribe_timeout, ack_rx).await;
        match acked {
            Ok(Ok(result)) => {
                if result.is_ok() {
                    info!("Subscribed to {}", filter);
                }
                result
            }
            Ok(Err(_)) => Err(TransportError::Subscribe {
                filter: filter.to_string(),
                reason: "event loop stopped".to_string(),
            }),
            Err(_) => {
                self.shared.tracker.lock().await.drop_abandoned();
                Err(TransportError::Timeout(format!("SubAck for {}", filter)))
            }
        }
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        delivery: Delivery,
    ) -> Result<(), TransportError> {
        {
            let status = self.shared.status.lock().await;
            if matches!(
                status.connection_state,
                ConnectionState::Disconnected | ConnectionState::Failed
            ) {
                return Err(TransportError::NotConnected);
            }
        }

        let request = self
            .shared
            .client
            .publish(topic, delivery.into(), false, payload);
        match tokio::time::timeout(self.subscribe_timeout, request).await {
            Ok(Ok(())) => {
                let mut status = self.shared.status.lock().await;
                status.messages_sent += 1;
                status.last_activity = Some(chrono::Local::now());
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "request queue full".to_string(),
            }),
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    connected_tx: oneshot::Sender<Result<(), TransportError>>,
) {
    let mut connected_tx = Some(connected_tx);

    loop {
        let polled = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("MQTT event loop cancelled");
                break;
            }
            polled = eventloop.poll() => polled,
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!("ConnAck received (session_present={})", ack.session_present);
                shared.set_state(ConnectionState::Connected).await;
                match connected_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(Ok(()));
                    }
                    None => on_reconnected(&shared, &ack).await,
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                {
                    let mut status = shared.status.lock().await;
                    status.messages_received += 1;
                    status.last_activity = Some(chrono::Local::now());
                }
                let msg = MqttMessage::from_topic(publish.topic.clone(), publish.payload.to_vec());
                debug!("Received {}", msg);
                shared.routes.distribute(msg).await;
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let resolved = shared.tracker.lock().await.resolve(&ack);
                match resolved {
                    Some((pending, true)) => {
                        if let Some(waiter) = pending.waiter {
                            let _ = waiter.send(Ok(()));
                        } else {
                            info!("Resubscribed to {}", pending.filter);
                        }
                    }
                    Some((pending, false)) => {
                        error!("Broker rejected subscription to {}", pending.filter);
                        if pending.fatal_on_reject {
                            shared
                                .fatal(format!("Server rejected resubscribe to topic: {}", pending.filter))
                                .await;
                        }
                        if let Some(waiter) = pending.waiter {
                            let _ = waiter.send(Err(TransportError::Rejected(pending.filter)));
                        }
                    }
                    None => debug!("SubAck for untracked packet {}", ack.pkid),
                }
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                shared.tracker.lock().await.assign(pkid);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("MQTT disconnect sent, stopping event loop");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                shared.status.lock().await.record_error(e.to_string());
                if let Some(tx) = connected_tx.take() {
                    error!("MQTT connection failed: {}", e);
                    shared.set_state(ConnectionState::Failed).await;
                    let _ = tx.send(Err(TransportError::Connect(e.to_string())));
                    break;
                }
                warn!("MQTT connection interrupted: {}, reconnecting", e);
                shared.set_state(ConnectionState::Reconnecting).await;
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}

async fn on_reconnected(shared: &Shared, ack: &ConnAck) {
    info!("Connection resumed (session_present={})", ack.session_present);
    if ack.session_present {
        return;
    }

    let filters = shared.routes.filters().await;
    info!(
        "Session did not persist. Resubscribing to {} existing topics",
        filters.len()
    );
    for filter in filters {
        if let Err(e) = shared.request_subscription(&filter, None, true).await {
            shared
                .fatal(format!("Could not resubscribe to {}: {}", filter, e))
                .await;
        }
    }
}

fn load_tls(tls: &TlsConfig) -> Result<TlsConfiguration, TransportError> {
    let read = |path: &std::path::Path| {
        std::fs::read(path)
            .map_err(|e| TransportError::Tls(format!("{}: {}", path.display(), e)))
    };

    let ca = read(&tls.ca_path)?;
    let client_auth = match (&tls.cert_path, &tls.key_path) {
        (Some(cert), Some(key)) => Some((read(cert)?, read(key)?)),
        (None, None) => None,
        _ => {
            return Err(TransportError::Tls(
                "cert_path and key_path must be set together".to_string(),
            ))
        }
    };
    let alpn = if tls.alpn.is_empty() {
        None
    } else {
        Some(tls.alpn.iter().map(|p| p.as_bytes().to_vec()).collect())
    };

    Ok(TlsConfiguration::Simple {
        ca,
        alpn,
        client_auth,
    })
}
