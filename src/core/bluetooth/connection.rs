//! Bluetooth connection handling
//! This module handles connecting to and disconnecting from a selected device

use std::sync::Arc;

use async_trait::async_trait;
use bluest::{Adapter, ConnectionEvent, Device};
use futures_util::StreamExt;
use log::{info, warn};

use crate::core::bluetooth::constants::expand_uuid;
use crate::core::bluetooth::gatt::BluestService;
use crate::core::bluetooth::types::Advertisement;
use crate::core::bluetooth::{GattServer, GattService, HostDevice};
use crate::error::HostError;

/// A device picked by a bluest scan.
pub struct BluestDevice {
    adapter: Adapter,
    device: Device,
    name: Option<String>,
    advertisement: Advertisement,
}

impl BluestDevice {
    pub fn new(
        adapter: Adapter,
        device: Device,
        name: Option<String>,
        advertisement: Advertisement,
    ) -> Self {
        Self {
            adapter,
            device,
            name,
            advertisement,
        }
    }
}

#[async_trait]
impl HostDevice for BluestDevice {
    fn id(&self) -> String {
        self.device.id().to_string()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn advertisement(&self) -> Advertisement {
        self.advertisement.clone()
    }

    async fn connect(&self) -> Result<Arc<dyn GattServer>, HostError> {
        let id = self.device.id().to_string();
        if !self.device.is_connected().await {
            info!("Initiating connection to {}...", id);
            self.adapter.connect_device(&self.device).await?;
        } else {
            info!("Device {} already connected.", id);
        }

        Ok(Arc::new(BluestServer {
            adapter: self.adapter.clone(),
            device: self.device.clone(),
        }))
    }
}

/// GATT connection to a bluest device.
pub struct BluestServer {
    adapter: Adapter,
    device: Device,
}

#[async_trait]
impl GattServer for BluestServer {
    async fn get_primary_service(&self, uuid: &str) -> Result<Arc<dyn GattService>, HostError> {
        let target = expand_uuid(uuid)?;
        let services = self.device.discover_services_with_uuid(target).await?;
        let service = services
            .into_iter()
            .next()
            .ok_or_else(|| HostError::AttributeNotFound {
                kind: "service",
                uuid: uuid.to_string(),
            })?;
        info!("Found service: {}", service.uuid());
        Ok(Arc::new(BluestService::new(service)))
    }

    async fn disconnect(&self) -> Result<(), HostError> {
        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.device.id());
            self.adapter.disconnect_device(&self.device).await?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", self.device.id());
        }
        Ok(())
    }

    async fn disconnected(&self) {
        match self.adapter.device_connection_events(&self.device).await {
            Ok(mut events) => {
                while let Some(event) = events.next().await {
                    if matches!(event, ConnectionEvent::Disconnected) {
                        return;
                    }
                }
                info!("Connection event stream for {} has ended.", self.device.id());
            }
            Err(e) => {
                warn!(
                    "Unable to watch connection events for {}: {}",
                    self.device.id(),
                    e
                );
                futures_util::future::pending::<()>().await;
            }
        }
    }
}
