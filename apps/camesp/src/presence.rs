//! Occupant presence, inferred from the house smartphones being reachable.
//!
//! Polls quickly while nobody is detected and slowly once someone is, so a
//! returning occupant is noticed within seconds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config_store::SharedConfig;
use crate::http::HttpClient;
use crate::link::LinkState;
use crate::notifier::{Notifier, topic};

pub const FAST_POLLING: Duration = Duration::from_secs(7);
pub const SLOW_POLLING: Duration = Duration::from_secs(53);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub activated: bool,
    /// Addresses of the occupants' phones; blank entries are skipped.
    pub smartphones: Vec<String>,
    pub notify: bool,
}

#[async_trait]
pub trait PresenceDetector: Send + Sync {
    async fn detect(&mut self, config: &PresenceConfig) -> bool;
}

pub type DetectorFactory = Arc<dyn Fn() -> Box<dyn PresenceDetector> + Send + Sync>;

/// A phone counts as present when its address answers an HTTP request,
/// whatever the answer.
pub struct HttpProbeDetector {
    client: HttpClient,
}

impl HttpProbeDetector {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    pub fn factory(client: HttpClient) -> DetectorFactory {
        Arc::new(move || Box::new(HttpProbeDetector::new(client.clone())) as Box<dyn PresenceDetector>)
    }
}

#[async_trait]
impl PresenceDetector for HttpProbeDetector {
    async fn detect(&mut self, config: &PresenceConfig) -> bool {
        for phone in config.smartphones.iter().map(|phone| phone.trim()).filter(|phone| !phone.is_empty()) {
            let url = if phone.contains("://") {
                phone.to_string()
            } else {
                format!("http://{phone}/")
            };
            if self.client.get(&url).await.is_some() {
                debug!(%phone, "smartphone reachable");
                return true;
            }
        }
        false
    }
}

pub struct PresencePoller {
    config: SharedConfig<PresenceConfig>,
    link: LinkState,
    notifier: Arc<dyn Notifier>,
    factory: DetectorFactory,
    detector: Option<Box<dyn PresenceDetector>>,
    interval: Duration,
    detected: bool,
    /// Activation state last announced; `None` until the first cycle.
    last_activated: Option<bool>,
    generation: u64,
}

impl PresencePoller {
    pub fn new(
        config: SharedConfig<PresenceConfig>,
        link: LinkState,
        notifier: Arc<dyn Notifier>,
        factory: DetectorFactory,
    ) -> Self {
        let generation = config.generation();
        Self {
            config,
            link,
            notifier,
            factory,
            detector: None,
            interval: FAST_POLLING,
            detected: false,
            last_activated: None,
            generation,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_detected(&self) -> bool {
        self.detected
    }

    pub fn has_detector(&self) -> bool {
        self.detector.is_some()
    }

    /// One detection cycle. Returns how long to wait before the next one.
    pub async fn poll_once(&mut self) -> Duration {
        match self.config.refresh() {
            Ok(_) => {}
            Err(err) => warn!(error = %err, "presence config refresh failed"),
        }
        let config = self.config.snapshot();
        if config.generation != self.generation {
            info!(config = ?config.value, "presence config changed");
            self.generation = config.generation;
        }

        if config.activated && self.link.is_lan_available() {
            let factory = &self.factory;
            let detector = self.detector.get_or_insert_with(|| factory());
            self.detected = detector.detect(&config).await;
            self.interval = if self.detected { SLOW_POLLING } else { FAST_POLLING };
        } else {
            self.interval = SLOW_POLLING;
            self.detected = false;
            self.detector = None;
        }

        if self.last_activated != Some(config.activated) {
            if config.activated {
                self.notifier.notify(
                    topic::PRESENCE_DETECTION,
                    Some(topic::VALUE_ON),
                    "Presence detection on",
                    config.notify,
                );
            } else {
                self.notifier.notify(
                    topic::PRESENCE_DETECTION,
                    Some(topic::VALUE_OFF),
                    "Presence detection off",
                    config.notify,
                );
            }
            self.last_activated = Some(config.activated);
        }

        self.interval
    }

    pub async fn run(mut self) {
        loop {
            let wait = self.poll_once().await;
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::{ConfigSource, ConfigStore, MemorySource};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl Notifier for Events {
        fn notify(&self, _topic: &str, value: Option<&str>, _message: &str, _enabled: bool) {
            self.0.lock().push(value.unwrap_or_default().to_string());
        }
    }

    struct Scripted {
        present: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PresenceDetector for Scripted {
        async fn detect(&mut self, _config: &PresenceConfig) -> bool {
            self.present.load(Ordering::SeqCst)
        }
    }

    struct Fixture {
        source: Arc<MemorySource>,
        link: LinkState,
        events: Arc<Events>,
        present: Arc<AtomicBool>,
        created: Arc<AtomicUsize>,
        poller: PresencePoller,
    }

    fn fixture(json: &str) -> Fixture {
        let source = Arc::new(MemorySource::with_json(json));
        let store: SharedConfig<PresenceConfig> =
            Arc::new(ConfigStore::new(source.clone() as Arc<dyn ConfigSource>));
        store.load_create().expect("config");
        let link = LinkState::connected();
        let events = Arc::new(Events::default());
        let present = Arc::new(AtomicBool::new(false));
        let created = Arc::new(AtomicUsize::new(0));
        let factory: DetectorFactory = {
            let present = present.clone();
            let created = created.clone();
            Arc::new(move || {
                created.fetch_add(1, Ordering::SeqCst);
                Box::new(Scripted {
                    present: present.clone(),
                }) as Box<dyn PresenceDetector>
            })
        };
        let poller = PresencePoller::new(store, link.clone(), events.clone(), factory);
        Fixture {
            source,
            link,
            events,
            present,
            created,
            poller,
        }
    }

    #[tokio::test]
    async fn interval_follows_detection() {
        let mut f = fixture(r#"{"activated":true}"#);
        assert_eq!(f.poller.poll_once().await, FAST_POLLING);
        f.present.store(true, Ordering::SeqCst);
        assert_eq!(f.poller.poll_once().await, SLOW_POLLING);
        assert!(f.poller.is_detected());
        f.present.store(false, Ordering::SeqCst);
        assert_eq!(f.poller.poll_once().await, FAST_POLLING);
        assert_eq!(f.created.load(Ordering::SeqCst), 1, "detector is reused");
    }

    #[tokio::test]
    async fn one_notification_per_transition() {
        let mut f = fixture(r#"{"activated":false}"#);
        f.poller.poll_once().await;
        f.poller.poll_once().await;
        f.source.set(br#"{"activated":true}"#);
        f.poller.poll_once().await;
        f.poller.poll_once().await;
        f.source.set(br#"{"activated":false}"#);
        f.poller.poll_once().await;
        assert_eq!(*f.events.0.lock(), ["off", "on", "off"]);
    }

    #[tokio::test]
    async fn lan_loss_releases_detector() {
        let mut f = fixture(r#"{"activated":true}"#);
        f.poller.poll_once().await;
        assert!(f.poller.has_detector());

        f.link.set_lan_connected(false);
        assert_eq!(f.poller.poll_once().await, SLOW_POLLING);
        assert!(!f.poller.has_detector());
        assert!(!f.poller.is_detected());

        f.link.set_lan_connected(true);
        f.poller.poll_once().await;
        assert_eq!(f.created.load(Ordering::SeqCst), 2);
        assert_eq!(f.events.0.lock().len(), 1, "lan changes are not transitions");
    }

    #[tokio::test]
    async fn http_probe_skips_blank_entries() {
        use crate::transport::mock::{MockConnector, Script};

        let connector = Arc::new(MockConnector::new());
        connector.push(Script::respond(b"HTTP/1.1 404 Not Found\r\n\r\n".to_vec()));
        let client = HttpClient::new(connector.clone(), LinkState::connected());
        let mut detector = HttpProbeDetector::new(client);
        let config = PresenceConfig {
            activated: true,
            smartphones: vec!["".into(), "  ".into(), "192.168.1.41".into()],
            notify: false,
        };
        assert!(detector.detect(&config).await);
        assert_eq!(connector.attempts(), 1);
        assert_eq!(connector.connection(0).expect("probe").host, "192.168.1.41");

        assert!(!detector.detect(&config).await, "refused connection means absent");
    }
}
