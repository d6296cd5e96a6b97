pub mod bridge_config;
pub mod channel_config;
pub mod host_config;

use std::path::Path;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::bridge_config::BridgeConfig;
use crate::config::channel_config::ChannelConfig;
use crate::config::host_config::HostConfig;
use crate::error::BridgeError;
use crate::utils::ensure_directory_exists;

pub const CONFIG_FILE_NAME: &str = "bridge_config.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub channel: ChannelConfig,
    pub bridge: BridgeConfig,
    pub host: HostConfig,
}

impl AppConfig {
    /// Loads the config from a JSON file, falling back to defaults when it is missing.
    pub async fn load_config(path: impl AsRef<Path>) -> Result<Self> {
        let file_path = path.as_ref();
        let file_path_str = file_path.to_string_lossy().into_owned();

        if !fs::try_exists(file_path).await.unwrap_or(false) {
            warn!(
                "Bridge config file not found at {:?}, using default.",
                file_path_str
            );
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Bridge config loaded from {:?}", file_path_str);
        Ok(config)
    }

    /// Saves the config as pretty JSON, creating the parent directory if needed.
    pub async fn save_config(&self, path: impl AsRef<Path>) -> Result<()> {
        let file_path = path.as_ref();
        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_directory_exists(parent).await?;
        }
        let file_path_str = file_path.to_string_lossy().into_owned();

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize bridge config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;
        info!("Bridge config saved to {:?}", file_path_str);
        Ok(())
    }

    /// Checks every section; a bad value means the bridge cannot start.
    pub fn validate(&self) -> Result<(), BridgeError> {
        self.channel.validate()?;
        self.bridge.validate()?;
        self.host.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.channel.topic, "hm:ble");
        assert!(!config.bridge.serialize_characteristic_ops);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"bridge": {"serialize_characteristic_ops": true}}"#).unwrap();
        assert!(config.bridge.serialize_characteristic_ops);
        assert_eq!(config.bridge.log_level, "info");
        assert_eq!(config.host.scan_timeout_ms, 10_000);
    }

    #[test]
    fn empty_topic_is_a_construction_error() {
        let mut config = AppConfig::default();
        config.channel.topic = "  ".into();
        assert!(matches!(config.validate(), Err(BridgeError::Construction(_))));
    }
}
