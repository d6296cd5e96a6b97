//! Host Bluetooth stack seen through the bridge
//! The bridge only talks to the capability traits below. The bluest-backed
//! implementation lives behind the `bluest` feature.

#[cfg(feature = "bluest")]
mod connection;
mod constants;
#[cfg(feature = "bluest")]
mod gatt;
#[cfg(feature = "bluest")]
mod scanner;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::HostError;

pub use constants::*;
#[cfg(feature = "bluest")]
pub use scanner::BluestHost;
pub use types::{Advertisement, DeviceFilter, RequestDeviceOptions};

/// Values delivered by an active notification subscription.
pub type ValueStream = BoxStream<'static, Vec<u8>>;

/// Entry point into the host stack: device selection.
#[async_trait]
pub trait HostBleTransport: Send + Sync {
    /// Selects one device matching the options.
    async fn request_device(
        &self,
        options: &RequestDeviceOptions,
    ) -> Result<Arc<dyn HostDevice>, HostError>;
}

/// A selected device.
#[async_trait]
pub trait HostDevice: Send + Sync {
    fn id(&self) -> String;

    fn name(&self) -> Option<String>;

    fn advertisement(&self) -> Advertisement;

    /// Opens a GATT connection.
    async fn connect(&self) -> Result<Arc<dyn GattServer>, HostError>;
}

/// A live GATT connection.
#[async_trait]
pub trait GattServer: Send + Sync {
    async fn get_primary_service(&self, uuid: &str) -> Result<Arc<dyn GattService>, HostError>;

    async fn disconnect(&self) -> Result<(), HostError>;

    /// Resolves once the host reports that this connection is gone.
    async fn disconnected(&self);
}

#[async_trait]
pub trait GattService: Send + Sync {
    fn uuid(&self) -> String;

    async fn get_characteristic(
        &self,
        uuid: &str,
    ) -> Result<Arc<dyn GattCharacteristic>, HostError>;
}

#[async_trait]
pub trait GattCharacteristic: Send + Sync {
    fn uuid(&self) -> String;

    async fn read_value(&self) -> Result<Vec<u8>, HostError>;

    async fn write_value(&self, value: &[u8]) -> Result<(), HostError>;

    /// Subscribes to value changes. The stream ends when the subscription stops.
    async fn start_notifications(&self) -> Result<ValueStream, HostError>;

    async fn stop_notifications(&self) -> Result<(), HostError>;
}
