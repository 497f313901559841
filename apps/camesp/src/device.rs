//! Builds every long lived service object once and starts the device tasks.

use std::sync::Arc;

use notify_bus::LocalBus;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::config_store::{ConfigError, ConfigSource, ConfigStore, FileSource, SharedConfig};
use crate::http::HttpClient;
use crate::link::LinkState;
use crate::notifier::{BusNotifier, Notifier};
use crate::platform::{HostPlatform, IssueCounter, Platform};
use crate::presence::{DetectorFactory, HttpProbeDetector, PresenceConfig, PresencePoller};
use crate::reservation::Reservation;
use crate::sessions::{SessionStore, SharedSessions};
use crate::supervisor::{LoginEvents, ServerConfig, ServiceGate, Supervisor, SupervisorParts};
use crate::tasking::spawn_monitored;
use crate::transport::{Connector, TcpConnector};
use crate::wanip::{WanIpHandle, WanIpPoller, WanIpService, default_services};
use crate::watchdog::{LONG_TIMEOUT, SoftwareWatchdog, Watchdog};

pub const SERVER_CONFIG_NAME: &str = "server";
pub const PRESENCE_CONFIG_NAME: &str = "presence";

pub struct DeviceBuilder {
    config: Config,
    link: LinkState,
    connector: Arc<dyn Connector>,
    platform: Arc<dyn Platform>,
    watchdog: Option<Arc<dyn Watchdog>>,
    server_source: Option<Arc<dyn ConfigSource>>,
    presence_source: Option<Arc<dyn ConfigSource>>,
    detector: Option<DetectorFactory>,
    wan_services: Vec<WanIpService>,
}

impl DeviceBuilder {
    pub fn link(mut self, link: LinkState) -> Self {
        self.link = link;
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = platform;
        self
    }

    pub fn watchdog(mut self, watchdog: Arc<dyn Watchdog>) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    /// Overrides the JSON files under the config directory.
    pub fn config_sources(mut self, server: Arc<dyn ConfigSource>, presence: Arc<dyn ConfigSource>) -> Self {
        self.server_source = Some(server);
        self.presence_source = Some(presence);
        self
    }

    pub fn detector(mut self, factory: DetectorFactory) -> Self {
        self.detector = Some(factory);
        self
    }

    pub fn wan_services(mut self, services: Vec<WanIpService>) -> Self {
        self.wan_services = services;
        self
    }

    pub fn build(self) -> Result<Device, ConfigError> {
        let dir = &self.config.config_dir;
        let server_source = self
            .server_source
            .unwrap_or_else(|| Arc::new(FileSource::in_dir(dir, SERVER_CONFIG_NAME)));
        let presence_source = self
            .presence_source
            .unwrap_or_else(|| Arc::new(FileSource::in_dir(dir, PRESENCE_CONFIG_NAME)));
        let server_config: SharedConfig<ServerConfig> = Arc::new(ConfigStore::new(server_source));
        server_config.load_create()?;
        let presence_config: SharedConfig<PresenceConfig> = Arc::new(ConfigStore::new(presence_source));
        presence_config.load_create()?;

        let watchdog = self
            .watchdog
            .unwrap_or_else(|| Arc::new(SoftwareWatchdog::new()));
        // Generous while starting up; the supervisor tightens it.
        watchdog.start(LONG_TIMEOUT);

        let http = HttpClient::new(self.connector, self.link.clone()).with_timeout(self.config.http_timeout);
        let detector = self
            .detector
            .unwrap_or_else(|| HttpProbeDetector::factory(http.clone()));
        let (notifier, bus) = BusNotifier::local();

        Ok(Device {
            config: self.config,
            link: self.link,
            issues: IssueCounter::new(),
            sessions: SessionStore::new().shared(),
            reservation: Arc::new(Reservation::new()),
            server_config,
            presence_config,
            notifier: Arc::new(notifier),
            bus,
            platform: self.platform,
            watchdog,
            http,
            login: LoginEvents::new(),
            services: ServiceGate::new(),
            detector,
            wan_services: self.wan_services,
            wan_ip: WanIpHandle::new(),
        })
    }
}

/// The singletons of one running device, shared with the tasks by handle.
pub struct Device {
    config: Config,
    link: LinkState,
    issues: IssueCounter,
    sessions: SharedSessions,
    reservation: Arc<Reservation>,
    server_config: SharedConfig<ServerConfig>,
    presence_config: SharedConfig<PresenceConfig>,
    notifier: Arc<dyn Notifier>,
    bus: Arc<LocalBus>,
    platform: Arc<dyn Platform>,
    watchdog: Arc<dyn Watchdog>,
    http: HttpClient,
    login: LoginEvents,
    services: ServiceGate,
    detector: DetectorFactory,
    wan_services: Vec<WanIpService>,
    wan_ip: WanIpHandle,
}

impl Device {
    pub fn builder(config: Config) -> DeviceBuilder {
        DeviceBuilder {
            config,
            link: LinkState::connected(),
            connector: Arc::new(TcpConnector::new()),
            platform: Arc::new(HostPlatform),
            watchdog: None,
            server_source: None,
            presence_source: None,
            detector: None,
            wan_services: default_services(),
        }
    }

    /// Real host wiring: TCP sockets, files under the config directory,
    /// process exit on reboot.
    pub fn create(config: Config) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn link(&self) -> &LinkState {
        &self.link
    }

    pub fn issues(&self) -> &IssueCounter {
        &self.issues
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn reservation(&self) -> Arc<Reservation> {
        self.reservation.clone()
    }

    pub fn sessions(&self) -> SharedSessions {
        self.sessions.clone()
    }

    pub fn bus(&self) -> Arc<LocalBus> {
        self.bus.clone()
    }

    pub fn services(&self) -> &ServiceGate {
        &self.services
    }

    pub fn server_config(&self) -> SharedConfig<ServerConfig> {
        self.server_config.clone()
    }

    pub fn presence_config(&self) -> SharedConfig<PresenceConfig> {
        self.presence_config.clone()
    }

    pub fn wan_ip(&self) -> &WanIpHandle {
        &self.wan_ip
    }

    /// Outcome of a login form. Feeds the login monitor and, on success,
    /// opens a session whose id is returned.
    pub fn login(&self, success: bool, remember_me: Option<&str>) -> Option<String> {
        self.login.record(success);
        success.then(|| {
            self.sessions
                .lock()
                .create(self.config.session_duration, remember_me)
        })
    }

    pub fn check_session(&self, id: Option<&str>) -> bool {
        self.sessions.lock().check(id)
    }

    pub fn logout(&self, id: &str) -> bool {
        self.sessions.lock().remove(id)
    }

    /// Spawns the supervisor and both pollers under the crash monitor.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let parts = SupervisorParts {
            config: self.server_config.clone(),
            login: self.login.clone(),
            services: self.services.clone(),
            link: self.link.clone(),
            issues: self.issues.clone(),
            platform: self.platform.clone(),
            watchdog: self.watchdog.clone(),
            notifier: self.notifier.clone(),
            watchdog_timeout: self.config.watchdog_timeout,
        };
        let supervisor = spawn_monitored("supervisor", self.issues.clone(), move || {
            Supervisor::new(parts.clone()).run()
        });

        let presence = {
            let config = self.presence_config.clone();
            let link = self.link.clone();
            let notifier = self.notifier.clone();
            let detector = self.detector.clone();
            spawn_monitored("presence", self.issues.clone(), move || {
                PresencePoller::new(config.clone(), link.clone(), notifier.clone(), detector.clone()).run()
            })
        };

        let wanip = {
            let http = self.http.clone();
            let config = self.server_config.clone();
            let link = self.link.clone();
            let notifier = self.notifier.clone();
            let services = self.wan_services.clone();
            let handle = self.wan_ip.clone();
            spawn_monitored("wanip", self.issues.clone(), move || {
                WanIpPoller::new(http.clone(), config.clone(), link.clone(), notifier.clone())
                    .with_services(services.clone())
                    .with_handle(handle.clone())
                    .run()
            })
        };

        info!(config_dir = %self.config.config_dir.display(), "device tasks started");
        vec![supervisor, presence, wanip]
    }

    /// Starts the tasks and never returns.
    pub async fn run(self) {
        let _tasks = self.start();
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::MemorySource;
    use crate::transport::mock::MockConnector;
    use std::time::Duration;

    struct Quiet;

    impl Watchdog for Quiet {
        fn start(&self, _timeout: Duration) {}
        fn feed(&self) {}
    }

    fn device() -> Device {
        Device::builder(Config::default())
            .connector(Arc::new(MockConnector::new()))
            .watchdog(Arc::new(Quiet))
            .config_sources(Arc::new(MemorySource::new()), Arc::new(MemorySource::new()))
            .build()
            .expect("device")
    }

    #[test]
    fn build_writes_default_configs() {
        let device = device();
        assert_eq!(**device.server_config().snapshot(), ServerConfig::default());
        assert!(!device.presence_config().snapshot().activated);
    }

    #[test]
    fn login_opens_sessions_only_on_success() {
        let device = device();
        assert_eq!(device.login(false, None), None);
        let id = device.login(true, None).expect("session");
        assert!(device.check_session(Some(&id)));
        assert!(device.logout(&id));
        assert!(!device.check_session(Some(&id)));
    }
}
