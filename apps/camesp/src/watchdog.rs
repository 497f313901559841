//! Liveness timer for the cooperative scheduler.
//!
//! The timer runs on its own OS thread: a scheduler that stops polling
//! futures cannot delay it. When it is not fed within the timeout the expiry
//! hook runs once; the default hook aborts the process like a hardware reset.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error};

pub const SHORT_TIMEOUT: Duration = Duration::from_secs(5);
pub const LONG_TIMEOUT: Duration = Duration::from_secs(15 * 60);

const MAX_CHECK_PERIOD: Duration = Duration::from_millis(100);

pub trait Watchdog: Send + Sync {
    /// Arms the timer, or changes its timeout when already armed.
    fn start(&self, timeout: Duration);
    fn feed(&self);
}

pub type ExpiryHook = Arc<dyn Fn(Duration) + Send + Sync>;

struct Shared {
    timeout: Mutex<Duration>,
    last_feed: Mutex<Instant>,
    running: AtomicBool,
    fired: AtomicBool,
    stop: AtomicBool,
    hook: ExpiryHook,
}

pub struct SoftwareWatchdog {
    shared: Arc<Shared>,
}

impl SoftwareWatchdog {
    pub fn new() -> Self {
        Self::with_hook(Arc::new(|timeout| {
            error!(?timeout, "watchdog expired, scheduler stalled");
            std::process::abort();
        }))
    }

    pub fn with_hook(hook: ExpiryHook) -> Self {
        Self {
            shared: Arc::new(Shared {
                timeout: Mutex::new(SHORT_TIMEOUT),
                last_feed: Mutex::new(Instant::now()),
                running: AtomicBool::new(false),
                fired: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                hook,
            }),
        }
    }

    pub fn has_fired(&self) -> bool {
        self.shared.fired.load(Ordering::SeqCst)
    }
}

impl Default for SoftwareWatchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog for SoftwareWatchdog {
    fn start(&self, timeout: Duration) {
        *self.shared.timeout.lock() = timeout;
        *self.shared.last_feed.lock() = Instant::now();
        if self.shared.running.swap(true, Ordering::SeqCst) {
            debug!(?timeout, "watchdog timeout changed");
            return;
        }
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || watch(shared));
        match spawned {
            Ok(_) => debug!(?timeout, "watchdog armed"),
            Err(err) => {
                self.shared.running.store(false, Ordering::SeqCst);
                error!(error = %err, "cannot start watchdog thread");
            }
        }
    }

    fn feed(&self) {
        *self.shared.last_feed.lock() = Instant::now();
    }
}

impl Drop for SoftwareWatchdog {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }
}

fn watch(shared: Arc<Shared>) {
    while !shared.stop.load(Ordering::SeqCst) {
        let timeout = *shared.timeout.lock();
        thread::sleep((timeout / 4).min(MAX_CHECK_PERIOD));
        let starved = shared.last_feed.lock().elapsed();
        if starved > timeout {
            shared.fired.store(true, Ordering::SeqCst);
            (shared.hook)(timeout);
            return;
        }
    }
}
