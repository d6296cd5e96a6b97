//! Application state management
//! Wires the bluest host and the stdio channel into one bridge.

use std::sync::Arc;

use anyhow::Result;
use log::{error, info};

use crate::channel::StdioChannel;
use crate::config::AppConfig;
use crate::core::bluetooth::BluestHost;
use crate::core::{Bridge, BridgeEvent, EventKind};

/// Global application state
pub struct AppState {
    pub config: AppConfig,
    pub bridge: Bridge,
}

impl AppState {
    /// Creates the bridge on the default adapter.
    ///
    /// There is no interactive prompt in this process, so every device
    /// request is approved as soon as it arrives.
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing Bluetooth host...");
        let host = BluestHost::new(config.host.scan_timeout()).await?;
        let bridge = Bridge::new(config.clone(), Arc::new(host), Arc::new(StdioChannel::new()))?;

        let approver = bridge.clone();
        bridge.on(EventKind::UserApproval, move |event| {
            if let BridgeEvent::UserApproval(payload) = event {
                let bridge = approver.clone();
                let payload = payload.clone();
                tokio::spawn(async move {
                    if let Err(e) = bridge.request_device(&payload).await {
                        error!("Device request failed: {}", e);
                    }
                });
            }
        });
        bridge.on(EventKind::Connected, |event| info!("Lifecycle: {:?}", event));
        bridge.on(EventKind::Disconnected, |event| info!("Lifecycle: {:?}", event));

        Ok(Self { config, bridge })
    }

    pub async fn run(&self) -> Result<()> {
        self.bridge.serve().await?;
        Ok(())
    }
}
