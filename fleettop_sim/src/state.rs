//! Shared sim state and runtime toggles.

use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::fleet::SimFleet;

pub type SharedFleet = Arc<RwLock<SimFleet>>;

/// Cadence of both the feed frames and the background drift.
pub const DEFAULT_FEED_PERIOD: Duration = Duration::from_millis(1000);

#[derive(Clone)]
pub struct SimState {
    pub fleet: SharedFleet,
    pub feed_period: Duration,
}

impl SimState {
    pub fn new(fleet: SimFleet) -> SimState {
        SimState::with_period(fleet, DEFAULT_FEED_PERIOD)
    }

    pub fn with_period(fleet: SimFleet, feed_period: Duration) -> SimState {
        SimState {
            fleet: Arc::new(RwLock::new(fleet)),
            feed_period,
        }
    }
}

// Runtime toggles (read once)
pub fn seeded_hosts() -> usize {
    static N: OnceCell<usize> = OnceCell::new();
    *N.get_or_init(|| {
        std::env::var("FLEETTOP_SIM_HOSTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(6)
    })
}

pub fn local_host_enabled() -> bool {
    static ON: OnceCell<bool> = OnceCell::new();
    *ON.get_or_init(|| {
        std::env::var("FLEETTOP_SIM_LOCAL_HOST")
            .map(|v| v != "0")
            .unwrap_or(false)
    })
}

/// `FLEETTOP_SIM_PERIOD_MS` override for the binary's feed period.
pub fn feed_period() -> Duration {
    static MS: OnceCell<u64> = OnceCell::new();
    Duration::from_millis(*MS.get_or_init(|| {
        std::env::var("FLEETTOP_SIM_PERIOD_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_FEED_PERIOD.as_millis() as u64)
    }))
}
