//! Per-characteristic operation gate
//! When enabled, at most one read, write or notification toggle is pending
//! per characteristic at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::core::registry::CharacteristicKey;

pub struct OperationGate {
    enabled: bool,
    locks: Mutex<HashMap<CharacteristicKey, Arc<AsyncMutex<()>>>>,
}

impl OperationGate {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Waits for the characteristic's turn. Returns `None` when gating is off.
    pub async fn enter(&self, key: &CharacteristicKey) -> Option<OwnedMutexGuard<()>> {
        if !self.enabled {
            return None;
        }
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };
        Some(lock.lock_owned().await)
    }

    /// Drops the idle locks of a device once its connection is gone.
    /// A lock that is still held or awaited stays, so its holders keep
    /// excluding each other.
    pub fn forget_device(&self, device_id: &str) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.retain(|key, lock| key.device_id != device_id || Arc::strong_count(lock) > 1);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}
