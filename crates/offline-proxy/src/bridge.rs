//! Wake-lock bridge
//!
//! Keeps the display awake while a timer runs. The page asks for a lock when a
//! round starts and releases it when the timer stops; both calls may repeat.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

/// Platform facility that prevents the display from sleeping
pub trait PowerSaveBlocker: Send + Sync {
    fn start(&self) -> u32;
    fn is_started(&self, id: u32) -> bool;
    fn stop(&self, id: u32);
}

/// Blocker that only tracks ids
#[derive(Debug, Default)]
pub struct LoggingBlocker {
    next_id: AtomicU32,
    active: Mutex<HashSet<u32>>,
}

impl LoggingBlocker {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> std::sync::MutexGuard<'_, HashSet<u32>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PowerSaveBlocker for LoggingBlocker {
    fn start(&self) -> u32 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.active().insert(id);
        info!(id, "Display sleep blocked");
        id
    }

    fn is_started(&self, id: u32) -> bool {
        self.active().contains(&id)
    }

    fn stop(&self, id: u32) {
        if self.active().remove(&id) {
            info!(id, "Display sleep released");
        }
    }
}

pub struct WakeLockBridge {
    blocker: Box<dyn PowerSaveBlocker>,
    current: Mutex<Option<u32>>,
}

impl WakeLockBridge {
    pub fn new(blocker: Box<dyn PowerSaveBlocker>) -> Self {
        Self {
            blocker,
            current: Mutex::new(None),
        }
    }

    /// Returns the active lock id, starting a lock only if none is held
    pub fn start(&self) -> u32 {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = *current {
            if self.blocker.is_started(id) {
                return id;
            }
            warn!(id, "Wake lock was dropped by the platform; restarting");
        }
        let id = self.blocker.start();
        *current = Some(id);
        id
    }

    /// Releases the lock if one is held. Always succeeds.
    pub fn stop(&self) -> bool {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = current.take() {
            if self.blocker.is_started(id) {
                self.blocker.stop(id);
            }
        }
        true
    }

    pub fn active(&self) -> Option<u32> {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        current.filter(|id| self.blocker.is_started(*id))
    }
}

impl Default for WakeLockBridge {
    fn default() -> Self {
        Self::new(Box::new(LoggingBlocker::new()))
    }
}
