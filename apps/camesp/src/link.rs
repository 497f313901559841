//! Network link state shared between the wifi driver, the supervisor and
//! the pollers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

#[derive(Debug, Default)]
struct LinkFlags {
    station_active: AtomicBool,
    lan_connected: AtomicBool,
    wan_connected: AtomicBool,
}

/// Cheap cloneable handle; every clone observes the same flags.
#[derive(Debug, Clone, Default)]
pub struct LinkState {
    flags: Arc<LinkFlags>,
}

impl LinkState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State of a host that is already on a network.
    pub fn connected() -> Self {
        let link = Self::new();
        link.set_station_active(true);
        link.set_lan_connected(true);
        link
    }

    pub fn set_station_active(&self, active: bool) {
        self.flags.station_active.store(active, Ordering::Relaxed);
    }

    pub fn set_lan_connected(&self, connected: bool) {
        self.flags.lan_connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_station_active(&self) -> bool {
        self.flags.station_active.load(Ordering::Relaxed)
    }

    pub fn is_lan_connected(&self) -> bool {
        self.flags.lan_connected.load(Ordering::Relaxed)
    }

    pub fn is_lan_available(&self) -> bool {
        self.is_station_active() && self.is_lan_connected()
    }

    /// The WAN may be probed once the LAN is up; whether it actually answers
    /// is tracked separately by [`LinkState::is_wan_connected`].
    pub fn is_wan_available(&self) -> bool {
        self.is_lan_available()
    }

    pub fn is_wan_connected(&self) -> bool {
        self.flags.wan_connected.load(Ordering::Relaxed)
    }

    pub fn wan_connected(&self) {
        if !self.flags.wan_connected.swap(true, Ordering::Relaxed) {
            info!("wan connected");
        }
    }

    pub fn wan_disconnected(&self) {
        if self.flags.wan_connected.swap(false, Ordering::Relaxed) {
            info!("wan disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lan_needs_active_station() {
        let link = LinkState::new();
        link.set_lan_connected(true);
        assert!(!link.is_lan_available());
        link.set_station_active(true);
        assert!(link.is_lan_available());
        assert!(link.is_wan_available());
        assert!(!link.is_wan_connected());
    }

    #[test]
    fn clones_share_flags() {
        let link = LinkState::connected();
        let other = link.clone();
        other.wan_connected();
        assert!(link.is_wan_connected());
        link.wan_disconnected();
        assert!(!other.is_wan_connected());
    }
}
