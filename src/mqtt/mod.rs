//! # MQTT Transport Module
//!
//! Provides the messaging seam the synchronization engine talks through. The
//! engine never touches a broker connection directly: it only sees the
//! [`MessageTransport`] trait, which offers connect/disconnect, subscribe with
//! a handler, and publish with a delivery guarantee.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker and TLS settings (TOML section `[mqtt]`)
//! ├── message_manager.rs  - Inbound message type and filter → handler routing
//! └── mqtt_handler.rs     - rumqttc-backed transport with SubAck tracking
//! ```
//!
//! ## Handler Model
//!
//! A handler is the sending half of an unbounded mpsc channel. The transport's
//! event loop never blocks on a slow consumer: every matching message is pushed
//! into the channel and the subscriber drains it on its own task.
//!
//! ```text
//! Broker ──► EventLoop ──► MsgManager ──[filter match]──► handler channel ──► subscriber task
//! ```

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;

use async_trait::async_trait;

pub use message_manager::{topic_matches, MessageHandler, MqttMessage, MsgManager};

/// Delivery guarantee requested for a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    AtMostOnce,
    #[default]
    AtLeastOnce,
}

impl From<Delivery> for rumqttc::QoS {
    fn from(delivery: Delivery) -> Self {
        match delivery {
            Delivery::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Delivery::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        }
    }
}

/// Errors raised by a messaging transport
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Failed to subscribe to {filter}: {reason}")]
    Subscribe { filter: String, reason: String },

    #[error("Broker rejected subscription to {0}")]
    Rejected(String),

    #[error("Failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

/// Injected publish/subscribe client shared by every shadow channel and the command router
///
/// Implementations must be safe to call concurrently; the engine never adds its
/// own locking around the transport.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Registers `handler` for every message matching `filter` and subscribes at the broker.
    ///
    /// Resolves once the broker has acknowledged the subscription.
    async fn subscribe(&self, filter: &str, handler: MessageHandler) -> Result<(), TransportError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        delivery: Delivery,
    ) -> Result<(), TransportError>;
}
