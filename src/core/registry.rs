//! Live tree of selected devices, their discovered services and characteristics
//!
//! The registry is a pure cache keyed on whatever strings it is given; the
//! command layer lower-cases UUIDs before they get here. Lookups are
//! synchronous and the lock is never held across a host call.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};

use crate::core::bluetooth::{
    Advertisement, GattCharacteristic, GattServer, GattService, HostDevice,
};
use crate::error::{BridgeError, Result};

/// Address of one characteristic on one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicKey {
    pub device_id: String,
    pub service_uuid: String,
    pub characteristic_uuid: String,
}

impl CharacteristicKey {
    pub fn new(
        device_id: impl Into<String>,
        service_uuid: impl Into<String>,
        characteristic_uuid: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            service_uuid: service_uuid.into(),
            characteristic_uuid: characteristic_uuid.into(),
        }
    }
}

impl fmt::Display for CharacteristicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.device_id, self.service_uuid, self.characteristic_uuid
        )
    }
}

/// Read-only view of a device record.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: Option<String>,
    pub advertisement: Advertisement,
    pub connected: bool,
}

struct CharacteristicEntry {
    handle: Arc<dyn GattCharacteristic>,
    notifying: bool,
}

struct ServiceEntry {
    handle: Arc<dyn GattService>,
    characteristics: HashMap<String, CharacteristicEntry>,
}

struct DeviceEntry {
    name: Option<String>,
    advertisement: Advertisement,
    handle: Arc<dyn HostDevice>,
    server: Option<Arc<dyn GattServer>>,
    /// Bumped whenever a connection is attached or claimed
    epoch: u64,
    services: HashMap<String, ServiceEntry>,
}

impl DeviceEntry {
    fn info(&self, id: &str) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            name: self.name.clone(),
            advertisement: self.advertisement.clone(),
            connected: self.server.is_some(),
        }
    }
}

#[derive(Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, DeviceEntry>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DeviceEntry>> {
        // Nothing panics while the guard is held, so a poisoned map is still consistent.
        self.devices.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts a selected device, or refreshes the record of a known one.
    ///
    /// A re-selected device keeps its live connection, services and
    /// subscriptions; only the host handle and advertisement are replaced.
    pub fn upsert_device(&self, device: Arc<dyn HostDevice>) -> DeviceInfo {
        let id = device.id();
        let name = device.name();
        let advertisement = device.advertisement();

        let mut devices = self.lock();
        let entry = devices
            .entry(id.clone())
            .and_modify(|entry| {
                debug!("Refreshing known device {}", id);
                entry.name = name.clone();
                entry.advertisement = advertisement.clone();
                entry.handle = device.clone();
            })
            .or_insert_with(|| DeviceEntry {
                name,
                advertisement,
                handle: device.clone(),
                server: None,
                epoch: 0,
                services: HashMap::new(),
            });
        entry.info(&id)
    }

    pub fn get_device(&self, device_id: &str) -> Result<DeviceInfo> {
        self.lock()
            .get(device_id)
            .map(|entry| entry.info(device_id))
            .ok_or_else(|| not_found_device(device_id))
    }

    pub fn device_handle(&self, device_id: &str) -> Result<Arc<dyn HostDevice>> {
        self.lock()
            .get(device_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| not_found_device(device_id))
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Stores a fresh connection and resets the service cache.
    /// Returns the epoch identifying this connection.
    pub fn attach_server(&self, device_id: &str, server: Arc<dyn GattServer>) -> Result<u64> {
        let mut devices = self.lock();
        let entry = devices
            .get_mut(device_id)
            .ok_or_else(|| not_found_device(device_id))?;
        entry.server = Some(server);
        entry.services.clear();
        entry.epoch += 1;
        info!("Device {} connected (epoch {})", device_id, entry.epoch);
        Ok(entry.epoch)
    }

    /// Takes the connection handle out of the record so exactly one caller
    /// tears it down. With `epoch` set, only that connection is claimed.
    pub fn claim_connection(
        &self,
        device_id: &str,
        epoch: Option<u64>,
    ) -> Option<Arc<dyn GattServer>> {
        let mut devices = self.lock();
        let entry = devices.get_mut(device_id)?;
        if epoch.is_some_and(|expected| expected != entry.epoch) {
            return None;
        }
        let server = entry.server.take()?;
        entry.epoch += 1;
        Some(server)
    }

    /// Drops the service cache and connection handle; the device record stays.
    pub fn clear_connection_state(&self, device_id: &str) {
        if let Some(entry) = self.lock().get_mut(device_id) {
            entry.server = None;
            entry.services.clear();
            debug!("Cleared connection state of {}", device_id);
        }
    }

    /// Returns the cached service, discovering it through the host on a miss.
    /// The boolean is true when a host round trip happened.
    pub async fn get_or_discover_service(
        &self,
        device_id: &str,
        service_uuid: &str,
    ) -> Result<(Arc<dyn GattService>, bool)> {
        let (server, epoch) = {
            let devices = self.lock();
            let entry = devices
                .get(device_id)
                .ok_or_else(|| not_found_device(device_id))?;
            if let Some(service) = entry.services.get(service_uuid) {
                return Ok((service.handle.clone(), false));
            }
            let server = entry.server.clone().ok_or_else(|| {
                BridgeError::NotFound(format!("device {} is not connected", device_id))
            })?;
            (server, entry.epoch)
        };

        let context = format!("device {}, service {}", device_id, service_uuid);
        let handle = server
            .get_primary_service(service_uuid)
            .await
            .map_err(|e| BridgeError::discovery(context.clone(), e))?;

        let mut devices = self.lock();
        let entry = devices
            .get_mut(device_id)
            .filter(|entry| entry.epoch == epoch)
            .ok_or_else(|| BridgeError::Discovery {
                context,
                reason: "connection closed during discovery".into(),
            })?;
        let service = entry
            .services
            .entry(service_uuid.to_string())
            .or_insert_with(|| ServiceEntry {
                handle,
                characteristics: HashMap::new(),
            });
        Ok((service.handle.clone(), true))
    }

    /// Same contract as [`Self::get_or_discover_service`], one level deeper.
    /// The owning service must have been discovered first.
    pub async fn get_or_discover_characteristic(
        &self,
        key: &CharacteristicKey,
    ) -> Result<(Arc<dyn GattCharacteristic>, bool)> {
        let context = format!(
            "device {}, service {}, characteristic {}",
            key.device_id, key.service_uuid, key.characteristic_uuid
        );
        let (service, epoch) = {
            let devices = self.lock();
            let entry = devices
                .get(&key.device_id)
                .ok_or_else(|| not_found_device(&key.device_id))?;
            let service = entry.services.get(&key.service_uuid).ok_or_else(|| {
                BridgeError::Discovery {
                    context: context.clone(),
                    reason: format!("service {} has not been discovered", key.service_uuid),
                }
            })?;
            if let Some(characteristic) = service.characteristics.get(&key.characteristic_uuid) {
                return Ok((characteristic.handle.clone(), false));
            }
            (service.handle.clone(), entry.epoch)
        };

        let handle = service
            .get_characteristic(&key.characteristic_uuid)
            .await
            .map_err(|e| BridgeError::discovery(context.clone(), e))?;

        let mut devices = self.lock();
        let service = devices
            .get_mut(&key.device_id)
            .filter(|entry| entry.epoch == epoch)
            .and_then(|entry| entry.services.get_mut(&key.service_uuid))
            .ok_or_else(|| BridgeError::Discovery {
                context,
                reason: "connection closed during discovery".into(),
            })?;
        let characteristic = service
            .characteristics
            .entry(key.characteristic_uuid.clone())
            .or_insert_with(|| CharacteristicEntry {
                handle,
                notifying: false,
            });
        Ok((characteristic.handle.clone(), true))
    }

    /// Looks up an already discovered characteristic.
    pub fn characteristic(&self, key: &CharacteristicKey) -> Result<Arc<dyn GattCharacteristic>> {
        self.with_characteristic(key, |entry| entry.handle.clone())
    }

    pub fn is_notifying(&self, key: &CharacteristicKey) -> Result<bool> {
        self.with_characteristic(key, |entry| entry.notifying)
    }

    /// Sets the notifying flag, returning the previous value.
    pub fn set_notifying(&self, key: &CharacteristicKey, notifying: bool) -> Result<bool> {
        self.with_characteristic(key, |entry| std::mem::replace(&mut entry.notifying, notifying))
    }

    /// (service, characteristic) pairs with an active subscription.
    pub fn active_notifications(&self, device_id: &str) -> Vec<(String, String)> {
        let devices = self.lock();
        let Some(entry) = devices.get(device_id) else {
            return Vec::new();
        };
        let mut active: Vec<(String, String)> = entry
            .services
            .iter()
            .flat_map(|(service_uuid, service)| {
                service
                    .characteristics
                    .iter()
                    .filter(|(_, characteristic)| characteristic.notifying)
                    .map(move |(uuid, _)| (service_uuid.clone(), uuid.clone()))
            })
            .collect();
        active.sort();
        active
    }

    /// Marks every subscription of a device inactive and hands back the
    /// characteristic handles so the caller can stop them on the host.
    pub fn take_active_subscriptions(
        &self,
        device_id: &str,
    ) -> Vec<(CharacteristicKey, Arc<dyn GattCharacteristic>)> {
        let mut devices = self.lock();
        let Some(entry) = devices.get_mut(device_id) else {
            return Vec::new();
        };
        let mut taken = Vec::new();
        for (service_uuid, service) in entry.services.iter_mut() {
            for (uuid, characteristic) in service.characteristics.iter_mut() {
                if std::mem::replace(&mut characteristic.notifying, false) {
                    taken.push((
                        CharacteristicKey::new(device_id, service_uuid.clone(), uuid.clone()),
                        characteristic.handle.clone(),
                    ));
                }
            }
        }
        taken.sort_by(|a, b| {
            (&a.0.service_uuid, &a.0.characteristic_uuid)
                .cmp(&(&b.0.service_uuid, &b.0.characteristic_uuid))
        });
        taken
    }

    /// Resolves the owning service of a subscription, or `None` once it is
    /// no longer active. Services sharing a characteristic UUID stay distinct.
    pub fn resolve_subscription(&self, key: &CharacteristicKey) -> Option<String> {
        let devices = self.lock();
        let service = devices
            .get(&key.device_id)?
            .services
            .get(&key.service_uuid)?;
        service
            .characteristics
            .get(&key.characteristic_uuid)
            .filter(|characteristic| characteristic.notifying)
            .map(|_| key.service_uuid.clone())
    }

    fn with_characteristic<T>(
        &self,
        key: &CharacteristicKey,
        f: impl FnOnce(&mut CharacteristicEntry) -> T,
    ) -> Result<T> {
        let mut devices = self.lock();
        let entry = devices
            .get_mut(&key.device_id)
            .ok_or_else(|| not_found_device(&key.device_id))?;
        if entry.server.is_none() {
            return Err(BridgeError::NotFound(format!(
                "device {} is not connected",
                key.device_id
            )));
        }
        let service = entry.services.get_mut(&key.service_uuid).ok_or_else(|| {
            BridgeError::NotFound(format!(
                "service {} on device {}",
                key.service_uuid, key.device_id
            ))
        })?;
        let characteristic = service
            .characteristics
            .get_mut(&key.characteristic_uuid)
            .ok_or_else(|| {
                BridgeError::NotFound(format!(
                    "characteristic {} in service {}",
                    key.characteristic_uuid, key.service_uuid
                ))
            })?;
        Ok(f(characteristic))
    }
}

fn not_found_device(device_id: &str) -> BridgeError {
    BridgeError::NotFound(format!("device {}", device_id))
}
