use chrono::NaiveDateTime;
use std::fmt;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// A message received from the broker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: NaiveDateTime,
}

impl fmt::Display for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} - {} ({} bytes)",
            self.received_at,
            self.topic,
            self.payload.len()
        )
    }
}

impl MqttMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        MqttMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: chrono::Local::now().naive_local(),
        }
    }
}

/// Receiving end of a subscription
pub type MessageHandler = mpsc::UnboundedSender<MqttMessage>;

/// MQTT topic filter matching with `+` (single level) and `#` (multi level) wildcards
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[derive(Debug)]
struct Route {
    filter: String,
    handler: MessageHandler,
}

/// Routes inbound messages to every handler whose filter matches
#[derive(Debug, Default)]
pub struct MsgManager {
    routes: RwLock<Vec<Route>>,
}

impl MsgManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, filter: &str, handler: MessageHandler) {
        debug!("Registering handler for {}", filter);
        self.routes.write().await.push(Route {
            filter: filter.to_string(),
            handler,
        });
    }

    /// Distinct filters with at least one live handler, in registration order
    pub async fn filters(&self) -> Vec<String> {
        let routes = self.routes.read().await;
        let mut filters: Vec<String> = Vec::with_capacity(routes.len());
        for route in routes.iter().filter(|r| !r.handler.is_closed()) {
            if !filters.contains(&route.filter) {
                filters.push(route.filter.clone());
            }
        }
        filters
    }

    /// Hands `msg` to every matching handler and returns how many accepted it
    ///
    /// Handlers whose receiving side has gone away are pruned.
    pub async fn distribute(&self, msg: MqttMessage) -> usize {
        let mut delivered = 0;
        let mut closed = false;
        {
            let routes = self.routes.read().await;
            for route in routes.iter().filter(|r| topic_matches(&r.filter, &msg.topic)) {
                match route.handler.send(msg.clone()) {
                    Ok(_) => delivered += 1,
                    Err(_) => closed = true,
                }
            }
        }

        if closed {
            let mut routes = self.routes.write().await;
            routes.retain(|r| !r.handler.is_closed());
            debug!("Pruned closed handlers, {} routes left", routes.len());
        }

        if delivered == 0 {
            warn!("No handler for message on {}", msg.topic);
        }
        delivered
    }
}
