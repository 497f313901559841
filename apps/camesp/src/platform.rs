//! Hooks into the hardware the supervisor keeps healthy.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{error, trace};

/// Exit status asking the service manager to start the process again.
pub const RESTART_EXIT_CODE: i32 = 75;

/// Problems seen since boot (task crashes, failed peripherals). Shared by
/// every task; the supervisor reboots once it grows too large.
#[derive(Debug, Clone, Default)]
pub struct IssueCounter {
    count: Arc<AtomicU32>,
}

impl IssueCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) -> u32 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }
}

pub trait Platform: Send + Sync {
    /// Collects garbage and retunes the allocator threshold.
    fn compact_memory(&self);

    /// Clears the battery brownout counter. Boards without battery ignore it.
    fn reset_brownout(&self) {}

    /// Restarts the whole device. Does not return on real hardware.
    fn reboot(&self, reason: &str);
}

/// Platform for a regular host: nothing to compact, reboot means exiting
/// with [`RESTART_EXIT_CODE`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPlatform;

impl Platform for HostPlatform {
    fn compact_memory(&self) {
        trace!("memory compaction requested");
    }

    fn reboot(&self, reason: &str) {
        error!(reason, "rebooting");
        std::process::exit(RESTART_EXIT_CODE);
    }
}
