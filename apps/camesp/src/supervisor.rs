//! The one fixed-period task. Every second it checks the login monitor,
//! keeps the link dependent services up, compacts memory, escalates
//! accumulated faults to a reboot and feeds the watchdog.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config_store::SharedConfig;
use crate::link::LinkState;
use crate::metrics;
use crate::notifier::{Notifier, topic};
use crate::platform::{IssueCounter, Platform};
use crate::watchdog::Watchdog;

pub const TICK: Duration = Duration::from_secs(1);
pub const LOGIN_PERIOD: u64 = 5;
pub const COMPACT_PERIOD: u64 = 7;
pub const REBOOT_CHECK_PERIOD: u64 = 3607;
pub const MAX_ISSUES: u32 = 15;
/// Successful logins are reported at most once per window, in ticks.
pub const LOGIN_SUCCESS_DEBOUNCE: u64 = 5 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Send login notifications.
    pub notify: bool,
    /// Track the public address.
    pub wanip: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            notify: true,
            wanip: true,
        }
    }
}

/// Latest login outcome, filled by the web router and drained by the
/// supervisor.
#[derive(Debug, Clone, Default)]
pub struct LoginEvents {
    latest: Arc<Mutex<Option<bool>>>,
}

impl LoginEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, success: bool) {
        *self.latest.lock() = Some(success);
    }

    pub fn take(&self) -> Option<bool> {
        self.latest.lock().take()
    }
}

/// Start switch of the services that need the LAN (web server and friends).
#[derive(Debug, Clone)]
pub struct ServiceGate {
    started: Arc<watch::Sender<bool>>,
}

impl Default for ServiceGate {
    fn default() -> Self {
        Self {
            started: Arc::new(watch::channel(false).0),
        }
    }
}

impl ServiceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only on the call that actually started the services.
    pub fn ensure_started(&self) -> bool {
        let started = self.started.send_if_modified(|started| !std::mem::replace(started, true));
        if started {
            info!("link dependent services started");
        }
        started
    }

    pub fn is_started(&self) -> bool {
        *self.started.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.started.subscribe()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorState {
    pub tick: u64,
    /// Tick of the last login notification of any outcome.
    pub last_login_notify: Option<u64>,
    pub last_success_notify: Option<u64>,
}

/// Everything the supervisor drives, cloned into each new instance.
#[derive(Clone)]
pub struct SupervisorParts {
    pub config: SharedConfig<ServerConfig>,
    pub login: LoginEvents,
    pub services: ServiceGate,
    pub link: LinkState,
    pub issues: IssueCounter,
    pub platform: Arc<dyn Platform>,
    pub watchdog: Arc<dyn Watchdog>,
    pub notifier: Arc<dyn Notifier>,
    pub watchdog_timeout: Duration,
}

pub struct Supervisor {
    parts: SupervisorParts,
    state: SupervisorState,
}

impl Supervisor {
    pub fn new(parts: SupervisorParts) -> Self {
        Self {
            parts,
            state: SupervisorState::default(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// One loop body, without the sleep. Advances the tick counter.
    pub fn tick(&mut self) {
        let tick = self.state.tick;
        metrics::SUPERVISOR_TICKS.inc();

        if tick % LOGIN_PERIOD == 0 {
            self.check_login();
            match self.parts.config.refresh() {
                Ok(true) => debug!(generation = self.parts.config.generation(), "server config changed"),
                Ok(false) => {}
                Err(err) => warn!(error = %err, "server config refresh failed"),
            }
        }

        if self.parts.link.is_lan_connected() {
            self.parts.services.ensure_started();
        }

        if self.parts.link.is_wan_connected() {
            self.parts.platform.reset_brownout();
        }

        if tick % COMPACT_PERIOD == 0 {
            self.parts.platform.compact_memory();
        }

        if tick % REBOOT_CHECK_PERIOD == 0 {
            let issues = self.parts.issues.get();
            if issues > MAX_ISSUES {
                let reason = format!("Reboot required, {issues} problems detected");
                error!(issues, tick, "{reason}");
                metrics::REBOOTS.inc();
                self.parts.platform.reboot(&reason);
            }
        }

        self.parts.watchdog.feed();
        self.state.tick += 1;
    }

    /// Runs forever, one tick per second.
    pub async fn run(mut self) {
        self.parts.watchdog.start(self.parts.watchdog_timeout);
        info!(timeout = ?self.parts.watchdog_timeout, "supervisor started");
        loop {
            self.tick();
            tokio::time::sleep(TICK).await;
        }
    }

    fn check_login(&mut self) {
        let Some(success) = self.parts.login.take() else {
            return;
        };
        let now = self.state.tick;
        let enabled = self.parts.config.snapshot().notify;
        if success {
            let due = match self.state.last_success_notify {
                None => true,
                Some(last) => last + LOGIN_SUCCESS_DEBOUNCE < now,
            };
            if !due {
                debug!(tick = now, "login success already reported recently");
                return;
            }
            self.state.last_success_notify = Some(now);
            self.parts
                .notifier
                .notify(topic::LOGIN, Some(topic::VALUE_SUCCESS), "Login success detected", enabled);
        } else {
            self.parts
                .notifier
                .notify(topic::LOGIN, Some(topic::VALUE_FAILED), "Login failed detected", enabled);
        }
        self.state.last_login_notify = Some(now);
    }
}
