//! Connectivity tracking.

use std::sync::atomic::{AtomicBool, Ordering};

/// The engine's current belief about remote reachability.
///
/// Routing samples this once at the start of each operation, so a flap
/// mid-operation cannot split one logical write across both stores. The flag
/// flips to offline when a transport failure is observed and back to online
/// when the application reports connectivity (or a replay cycle is asked for).
#[derive(Debug)]
pub struct Connectivity {
    online: AtomicBool,
}

impl Connectivity {
    /// Creates a tracker with the given initial belief.
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Returns the current belief.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Records a connectivity change.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}
