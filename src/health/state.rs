//! Process health state.
//!
//! # States
//! - Live: the process is able to serve requests
//! - Ready: the process wants new traffic
//!
//! # State Transitions
//! ```text
//! startup  → live, ready
//! shutdown → live, not ready (drain in progress)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(true),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.is_live() && self.ready.load(Ordering::Acquire)
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Release);
    }

    pub fn set_ready(&self, ready: bool) {
        if self.ready.swap(ready, Ordering::AcqRel) != ready {
            tracing::info!(ready, "Readiness changed");
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
