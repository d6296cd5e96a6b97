//! Notification subscriptions
//! Tracks which characteristics have an active value-change subscription and
//! owns the listener task forwarding each one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::commands::CommandKind;
use crate::core::error_reporter::ErrorReporter;
use crate::core::registry::{CharacteristicKey, DeviceRegistry};
use crate::error::{BridgeError, Result};

pub struct NotificationTracker {
    registry: Arc<DeviceRegistry>,
    reporter: ErrorReporter,
    listeners: Mutex<HashMap<CharacteristicKey, JoinHandle<()>>>,
}

impl NotificationTracker {
    pub fn new(registry: Arc<DeviceRegistry>, reporter: ErrorReporter) -> Self {
        Self {
            registry,
            reporter,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<CharacteristicKey, JoinHandle<()>>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sets the notifying flag. Returns false if it was already set, in which
    /// case the subscription belongs to whoever set it first.
    pub fn mark_active(&self, key: &CharacteristicKey) -> Result<bool> {
        Ok(!self.registry.set_notifying(key, true)?)
    }

    /// Clears the notifying flag, returning whether it was set.
    pub fn mark_inactive(&self, key: &CharacteristicKey) -> Result<bool> {
        self.registry.set_notifying(key, false)
    }

    pub fn list_active(&self, device_id: &str) -> Vec<(String, String)> {
        self.registry.active_notifications(device_id)
    }

    /// Stores the task forwarding values for `key`, replacing any previous one.
    pub fn register_listener(&self, key: CharacteristicKey, listener: JoinHandle<()>) {
        if let Some(previous) = self.listeners().insert(key, listener) {
            previous.abort();
        }
    }

    /// Stops the forwarding task for `key`. Returns whether one was registered.
    pub fn unregister_listener(&self, key: &CharacteristicKey) -> bool {
        match self.listeners().remove(key) {
            Some(listener) => {
                listener.abort();
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    /// Stops every active subscription of a device.
    ///
    /// Each subscription is handled on its own: a failing host stop is
    /// reported with the `stop_notifications` code and the rest still run.
    /// Returns the number of subscriptions torn down.
    pub async fn teardown_all(&self, device_id: &str) -> usize {
        let subscriptions = self.registry.take_active_subscriptions(device_id);
        let count = subscriptions.len();
        if count > 0 {
            info!("Stopping {} notification(s) on {}", count, device_id);
        }

        for (key, characteristic) in subscriptions {
            if let Err(e) = characteristic.stop_notifications().await {
                let err = BridgeError::operation("stop_notifications", e);
                let kind = CommandKind::StopNotifications;
                self.reporter
                    .report(
                        &err,
                        kind.error_code(),
                        kind.event_name(),
                        json!({
                            "device_id": key.device_id,
                            "service_uuid": key.service_uuid,
                            "characteristic_uuid": key.characteristic_uuid,
                        }),
                    )
                    .await;
            } else {
                debug!("Stopped notifications on {}", key);
            }
            if !self.unregister_listener(&key) {
                warn!("No listener was registered for {}", key);
            }
        }

        // Listeners whose flag was already cleared still belong to this device.
        let stale: Vec<CharacteristicKey> = self
            .listeners()
            .keys()
            .filter(|key| key.device_id == device_id)
            .cloned()
            .collect();
        for key in stale {
            self.unregister_listener(&key);
        }

        count
    }
}
