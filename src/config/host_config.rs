use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::DEFAULT_SCAN_TIMEOUT_MS;
use crate::error::BridgeError;

/// Host Bluetooth stack settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// How long a device request scans before giving up
    pub scan_timeout_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            scan_timeout_ms: DEFAULT_SCAN_TIMEOUT_MS,
        }
    }
}

impl HostConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.scan_timeout_ms == 0 {
            return Err(BridgeError::Construction(
                "host.scan_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
