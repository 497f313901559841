//! Fire-and-forget user notifications.

use std::sync::Arc;

use notify_bus::{Bus, BusError, LocalBus, Notification};
use tracing::{debug, info};

pub mod topic {
    pub const LOGIN: &str = "login";
    pub const PRESENCE_DETECTION: &str = "presence_detection";
    pub const WAN_IP: &str = "wan_ip";

    pub const VALUE_SUCCESS: &str = "success";
    pub const VALUE_FAILED: &str = "failed";
    pub const VALUE_ON: &str = "on";
    pub const VALUE_OFF: &str = "off";
}

pub trait Notifier: Send + Sync {
    fn notify(&self, topic: &str, value: Option<&str>, message: &str, enabled: bool);
}

/// Logs each notification and hands it to the bus for whoever forwards it.
#[derive(Clone)]
pub struct BusNotifier {
    bus: Arc<dyn Bus>,
}

impl BusNotifier {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    pub fn local() -> (Self, Arc<LocalBus>) {
        let bus = Arc::new(LocalBus::new());
        (Self::new(bus.clone()), bus)
    }
}

impl Notifier for BusNotifier {
    fn notify(&self, topic: &str, value: Option<&str>, message: &str, enabled: bool) {
        info!(topic, value, enabled, "{message}");
        let mut notification = Notification::new(topic, message).enabled(enabled);
        if let Some(value) = value {
            notification = notification.with_value(value);
        }
        match self.bus.publish(notification) {
            Ok(delivered) => debug!(topic, delivered, "notification published"),
            Err(BusError::NoSubscribers(_)) => debug!(topic, "notification had no listener"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_on_topic_with_value() {
        let (notifier, bus) = BusNotifier::local();
        let mut sub = bus.subscribe(topic::LOGIN);
        notifier.notify(topic::LOGIN, Some(topic::VALUE_FAILED), "login failed", false);

        let received = sub.recv().await.expect("notification");
        assert_eq!(received.value.as_deref(), Some("failed"));
        assert_eq!(received.message, "login failed");
        assert!(!received.enabled);
    }

    #[test]
    fn missing_listener_is_not_an_error() {
        let (notifier, _bus) = BusNotifier::local();
        notifier.notify(topic::WAN_IP, None, "wan ip changed", true);
    }
}
