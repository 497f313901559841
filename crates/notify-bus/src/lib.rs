use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

const TOPIC_CAPACITY: usize = 64;

/// A device event destined for the user (push message, mail, log view).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub topic: String,
    pub value: Option<String>,
    pub message: String,
    /// Whether the user asked to be told about this topic. Subscribers that
    /// forward off-device must drop disabled notifications.
    pub enabled: bool,
}

impl Notification {
    pub fn new(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            value: None,
            message: message.into(),
            enabled: true,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("no subscriber listening on topic {0}")]
    NoSubscribers(String),
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus: Send + Sync {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Notification>;
    /// Receives every notification regardless of topic.
    fn subscribe_all(&self) -> broadcast::Receiver<Notification>;
    /// Returns how many receivers the notification reached.
    fn publish(&self, notification: Notification) -> BusResult<usize>;
}

/// In-process bus; one broadcast channel per topic plus a catch-all channel.
#[derive(Debug)]
pub struct LocalBus {
    topics: parking_lot::RwLock<HashMap<String, broadcast::Sender<Notification>>>,
    all: broadcast::Sender<Notification>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self {
            topics: parking_lot::RwLock::new(HashMap::new()),
            all: broadcast::channel(TOPIC_CAPACITY).0,
        }
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<Notification> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        let mut guard = self.topics.write();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Notification> {
        self.sender_for(topic).subscribe()
    }

    fn subscribe_all(&self) -> broadcast::Receiver<Notification> {
        self.all.subscribe()
    }

    fn publish(&self, notification: Notification) -> BusResult<usize> {
        let topic = notification.topic.clone();
        let by_topic = self
            .sender_for(&topic)
            .send(notification.clone())
            .unwrap_or(0);
        let catch_all = self.all.send(notification).unwrap_or(0);
        match by_topic + catch_all {
            0 => Err(BusError::NoSubscribers(topic)),
            delivered => Ok(delivered),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn topic_subscriber_receives_notification() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("wan_ip");
        let delivered = bus
            .publish(Notification::new("wan_ip", "Wan ip changed").with_value("203.0.113.9"))
            .expect("publish ok");
        assert_eq!(delivered, 1);
        let msg = sub.recv().await.expect("receive ok");
        assert_eq!(msg.topic, "wan_ip");
        assert_eq!(msg.value.as_deref(), Some("203.0.113.9"));
        assert!(msg.enabled);
    }

    #[tokio::test]
    async fn catch_all_sees_every_topic() {
        let bus = LocalBus::new();
        let mut all = bus.subscribe_all();
        let mut login = bus.subscribe("login");
        bus.publish(Notification::new("login", "Login failed").enabled(false))
            .expect("publish login");
        bus.publish(Notification::new("presence_detection", "Presence detection on"))
            .expect("publish presence");

        assert_eq!(login.recv().await.expect("login").message, "Login failed");
        assert_eq!(all.recv().await.expect("first").topic, "login");
        assert_eq!(all.recv().await.expect("second").topic, "presence_detection");
        assert!(login.try_recv().is_err());
    }

    #[test]
    fn publish_without_listeners_reports_it() {
        let bus = LocalBus::new();
        let err = bus
            .publish(Notification::new("login", "Login success detected"))
            .expect_err("nobody listening");
        assert_eq!(err, BusError::NoSubscribers("login".into()));
    }
}
