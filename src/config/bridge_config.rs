use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Command handling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Hold a per-characteristic lock across reads, writes and notification toggles.
    /// Turn this on for host stacks without their own operation queue.
    pub serialize_characteristic_ops: bool,
    /// Default log level; `RUST_LOG` takes precedence.
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            serialize_characteristic_ops: false,
            log_level: "info".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn level_filter(&self) -> Result<LevelFilter, BridgeError> {
        self.log_level.parse().map_err(|_| {
            BridgeError::Construction(format!("unknown log level {:?}", self.log_level))
        })
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        self.level_filter().map(|_| ())
    }
}
