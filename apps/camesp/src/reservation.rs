//! Exclusive camera ownership shared by the streaming and motion tasks.
//!
//! The current owner may re-enter; every `acquire` must be matched by a
//! `release`. A cooldown set by the owner is spent by refused attempts of
//! the next candidates, one unit per attempt, not by elapsed time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::metrics;

const RETRY_PERIOD: Duration = Duration::from_secs(1);

/// Identity of a reservation holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// A fresh id, distinct from every other id handed out by `next`.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservationState {
    pub owner: Option<OwnerId>,
    pub count: u32,
    pub cooldown: u32,
}

#[derive(Debug, Default)]
pub struct Reservation {
    state: Mutex<ReservationState>,
}

impl Reservation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes or re-enters the reservation.
    ///
    /// Passing `cooldown` bypasses a pending cooldown on a free resource and
    /// installs a new one for the next window; a same-owner call without it
    /// clears the cooldown.
    pub async fn acquire(&self, owner: OwnerId, cooldown: Option<u32>) -> bool {
        let mut state = self.state.lock().await;
        match state.owner {
            None => {
                if cooldown.is_none() && state.cooldown > 0 {
                    state.cooldown -= 1;
                    trace!(%owner, remaining = state.cooldown, "reservation cooling down");
                    metrics::RESERVATION_REJECTIONS
                        .with_label_values(&["cooldown"])
                        .inc();
                    return false;
                }
                state.owner = Some(owner);
                state.count = 1;
                state.cooldown = cooldown.unwrap_or(0);
                debug!(%owner, cooldown = state.cooldown, "camera reserved");
                true
            }
            Some(current) if current == owner => {
                state.count += 1;
                state.cooldown = cooldown.unwrap_or(0);
                true
            }
            Some(current) => {
                trace!(%owner, holder = %current, "camera already reserved");
                metrics::RESERVATION_REJECTIONS
                    .with_label_values(&["held"])
                    .inc();
                false
            }
        }
    }

    /// Drops one level of ownership. The cooldown is left for the next window.
    pub async fn release(&self, owner: OwnerId) -> bool {
        let mut state = self.state.lock().await;
        if state.owner != Some(owner) {
            return false;
        }
        if state.count <= 1 {
            state.count = 0;
            state.owner = None;
            debug!(%owner, cooldown = state.cooldown, "camera released");
        } else {
            state.count -= 1;
        }
        true
    }

    /// Calls [`Reservation::acquire`] once per second until it succeeds or
    /// `timeout_secs` attempts were refused. At least one attempt is made.
    pub async fn reserve(&self, owner: OwnerId, timeout_secs: u32, cooldown: Option<u32>) -> bool {
        let mut remaining = timeout_secs;
        loop {
            if self.acquire(owner, cooldown).await {
                return true;
            }
            remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                debug!(%owner, timeout_secs, "camera reservation timed out");
                return false;
            }
            tokio::time::sleep(RETRY_PERIOD).await;
        }
    }

    pub async fn state(&self) -> ReservationState {
        *self.state.lock().await
    }
}
