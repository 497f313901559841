//! Public address discovery through external "what is my ip" services.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config_store::SharedConfig;
use crate::http::{HttpClient, RequestBody};
use crate::link::LinkState;
use crate::notifier::{Notifier, topic};
use crate::supervisor::ServerConfig;

pub const SYNC_PERIOD: Duration = Duration::from_secs(86413);
pub const ENABLED_POLLING: Duration = Duration::from_secs(13);
pub const DISABLED_POLLING: Duration = Duration::from_secs(59);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WanIpService {
    pub host: String,
    pub path: String,
}

impl WanIpService {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}{}", self.host, self.path)
    }
}

pub fn default_services() -> Vec<WanIpService> {
    [
        ("alma.ch", "/myip.cgi"),
        ("api.infoip.io", "/ip"),
        ("api.ipify.org", "/"),
        ("checkip.amazonaws.com", "/"),
        ("l2.io", "/ip"),
        ("whatismyip.akamai.com", "/"),
    ]
    .into_iter()
    .map(|(host, path)| WanIpService::new(host, path))
    .collect()
}

/// Some services refuse clients that do not look like a browser.
const BROWSER_HEADERS: &[(&str, &str)] = &[
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    ),
    (
        "User-Agent",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.3 Safari/605.1.15",
    ),
    ("Accept-Language", "fr-FR,fr;q=0.9"),
];

#[derive(Debug, Default)]
struct Shared {
    wan_ip: RwLock<Option<String>>,
    forced: AtomicBool,
}

/// Read and force access for other tasks while the poller runs. Survives
/// poller restarts when passed to [`WanIpPoller::with_handle`].
#[derive(Debug, Clone, Default)]
pub struct WanIpHandle {
    shared: Arc<Shared>,
}

impl WanIpHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wan_ip(&self) -> Option<String> {
        self.shared.wan_ip.read().clone()
    }

    /// Next cycle synchronizes even if the last sync is recent.
    pub fn force(&self) {
        self.shared.forced.store(true, Ordering::SeqCst);
    }
}

pub struct WanIpPoller {
    client: HttpClient,
    config: SharedConfig<ServerConfig>,
    link: LinkState,
    notifier: Arc<dyn Notifier>,
    services: Vec<WanIpService>,
    last_sync: Option<Instant>,
    shared: Arc<Shared>,
}

impl WanIpPoller {
    pub fn new(
        client: HttpClient,
        config: SharedConfig<ServerConfig>,
        link: LinkState,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            client,
            config,
            link,
            notifier,
            services: default_services(),
            last_sync: None,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn with_services(mut self, services: Vec<WanIpService>) -> Self {
        self.services = services;
        self
    }

    pub fn with_handle(mut self, handle: WanIpHandle) -> Self {
        self.shared = handle.shared;
        self
    }

    pub fn handle(&self) -> WanIpHandle {
        WanIpHandle {
            shared: self.shared.clone(),
        }
    }

    /// One cycle. Returns how long to wait before the next one.
    pub async fn poll_once(&mut self) -> Duration {
        if let Err(err) = self.config.refresh() {
            warn!(error = %err, "server config refresh failed");
        }
        let config = self.config.snapshot();
        if !config.wanip {
            return DISABLED_POLLING;
        }
        if !self.link.is_wan_available() || !self.sync_due() {
            return ENABLED_POLLING;
        }

        match self.synchronize().await {
            Some(address) => {
                let previous = self.shared.wan_ip.read().clone();
                if let Some(previous) = previous.as_deref().filter(|previous| *previous != address) {
                    self.notifier.notify(
                        topic::WAN_IP,
                        None,
                        &format!("Wan ip changed from {previous} to {address}"),
                        config.notify,
                    );
                }
                if previous.is_none() {
                    info!(%address, "wan ip discovered");
                }
                *self.shared.wan_ip.write() = Some(address);
                self.last_sync = Some(Instant::now());
                self.link.wan_connected();
            }
            None => self.link.wan_disconnected(),
        }
        ENABLED_POLLING
    }

    pub async fn run(mut self) {
        loop {
            let wait = self.poll_once().await;
            tokio::time::sleep(wait).await;
        }
    }

    fn sync_due(&self) -> bool {
        let forced = self.shared.forced.swap(false, Ordering::SeqCst);
        forced
            || self
                .last_sync
                .is_none_or(|last| last.elapsed() >= SYNC_PERIOD)
    }

    async fn synchronize(&self) -> Option<String> {
        let service = {
            let mut rng = rand::thread_rng();
            self.services.choose(&mut rng).cloned()
        }?;
        let url = service.url();
        let Some(response) = self
            .client
            .request("GET", &url, RequestBody::Empty, BROWSER_HEADERS)
            .await
        else {
            warn!(host = %service.host, "cannot get wan ip");
            return None;
        };
        if !response.is_ok() {
            warn!(host = %service.host, status = response.status, "cannot get wan ip");
            return None;
        }
        match std::str::from_utf8(response.content()).map(str::trim) {
            Ok(address) if !address.is_empty() => {
                debug!(host = %service.host, %address, "wan ip answered");
                Some(address.to_string())
            }
            _ => {
                warn!(host = %service.host, "wan ip service sent an unusable body");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_services_are_plain_http() {
        let services = default_services();
        assert_eq!(services.len(), 6);
        assert_eq!(services[0].url(), "http://alma.ch/myip.cgi");
        assert!(services.iter().all(|service| service.path.starts_with('/')));
    }
}
