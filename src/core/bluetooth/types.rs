//! Defines shared data structures for the Bluetooth module.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::expand_uuid;

/// Advertisement fields captured when a device is selected.
/// Every field is `None` when the host stack does not report it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Service UUIDs from the advertisement, lower-cased
    pub advertised_services: Option<Vec<String>>,
    /// Manufacturer payloads keyed by company identifier, base64 wire text
    pub manufacturer_data: Option<BTreeMap<String, String>>,
    /// Advertised transmit power in dBm
    pub tx_power: Option<i16>,
    /// Signal strength at selection time
    pub rssi: Option<i16>,
}

/// One device filter of a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceFilter {
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "namePrefix")]
    pub name_prefix: Option<String>,
}

impl DeviceFilter {
    /// Returns true when an advertised device satisfies every populated field.
    pub fn matches(&self, name: Option<&str>, advertised_services: &[String]) -> bool {
        if let Some(expected) = &self.name {
            if name != Some(expected.as_str()) {
                return false;
            }
        }
        if let Some(prefix) = &self.name_prefix {
            if !name.map(|value| value.starts_with(prefix.as_str())).unwrap_or(false) {
                return false;
            }
        }
        self.services.iter().all(|wanted| {
            advertised_services
                .iter()
                .any(|present| same_uuid(present, wanted))
        })
    }
}

/// Compares UUIDs in any accepted form, so `"180f"` equals its 128-bit expansion.
fn same_uuid(a: &str, b: &str) -> bool {
    match (expand_uuid(a), expand_uuid(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.eq_ignore_ascii_case(b),
    }
}

/// Options for selecting a device, taken from the approved `request_device` payload.
///
/// The top-level `services`/`name` shorthand is folded into one extra filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestDeviceOptions {
    #[serde(default)]
    pub filters: Vec<DeviceFilter>,
    #[serde(default, alias = "acceptAllDevices")]
    pub accept_all_devices: bool,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl RequestDeviceOptions {
    /// Reads options out of an opaque payload, falling back to defaults for
    /// anything that does not fit.
    pub fn from_payload(payload: &serde_json::Value) -> Self {
        match serde_json::from_value(payload.clone()) {
            Ok(options) => options,
            Err(e) => {
                log::warn!("Ignoring unreadable request options {}: {}", payload, e);
                Self::default()
            }
        }
    }

    pub fn effective_filters(&self) -> Vec<DeviceFilter> {
        let mut filters = self.filters.clone();
        if !self.services.is_empty() || self.name.is_some() {
            filters.push(DeviceFilter {
                services: self.services.clone(),
                name: self.name.clone(),
                name_prefix: None,
            });
        }
        filters
    }

    /// Service UUIDs the scan can be narrowed to, if every filter names some.
    pub fn scan_services(&self) -> Vec<String> {
        let filters = self.effective_filters();
        if self.accept_all_devices || filters.iter().any(|f| f.services.is_empty()) {
            return Vec::new();
        }
        let mut services: Vec<String> = filters
            .into_iter()
            .flat_map(|f| f.services)
            .map(|uuid| uuid.to_lowercase())
            .collect();
        services.sort();
        services.dedup();
        services
    }

    pub fn matches(&self, name: Option<&str>, advertised_services: &[String]) -> bool {
        let filters = self.effective_filters();
        if self.accept_all_devices || filters.is_empty() {
            return true;
        }
        filters.iter().any(|f| f.matches(name, advertised_services))
    }
}
