use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

pub const DEFAULT_TOPIC: &str = "hm:ble";

/// Remote channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Topic the bridge joins before serving commands
    pub topic: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            topic: DEFAULT_TOPIC.to_string(),
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.topic.trim().is_empty() {
            return Err(BridgeError::Construction(
                "channel.topic must not be empty".into(),
            ));
        }
        Ok(())
    }
}
