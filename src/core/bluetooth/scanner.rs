//! Device selection against the bluest adapter

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bluest::{Adapter, AdvertisingDevice};
use futures_util::StreamExt;
use log::{debug, info, warn};

use crate::core::bluetooth::connection::BluestDevice;
use crate::core::bluetooth::constants::expand_uuid;
use crate::core::bluetooth::types::{Advertisement, RequestDeviceOptions};
use crate::core::bluetooth::{HostBleTransport, HostDevice};
use crate::core::codec;
use crate::error::{BridgeError, HostError};

/// Host stack backed by the default bluest adapter.
#[derive(Clone)]
pub struct BluestHost {
    adapter: Adapter,
    scan_timeout: Duration,
}

impl BluestHost {
    /// Opens the default adapter and waits until it is powered.
    pub async fn new(scan_timeout: Duration) -> Result<Self, BridgeError> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| BridgeError::Construction(HostError::NoAdapter.to_string()))?;
        adapter
            .wait_available()
            .await
            .map_err(|e| BridgeError::Construction(e.to_string()))?;
        info!("Bluetooth adapter is available.");
        Ok(Self {
            adapter,
            scan_timeout,
        })
    }

    /// Scans until a device matches or the timeout elapses.
    async fn scan_for_match(
        &self,
        options: &RequestDeviceOptions,
    ) -> Result<AdvertisingDevice, HostError> {
        let services = options
            .scan_services()
            .iter()
            .map(|uuid| expand_uuid(uuid))
            .collect::<Result<Vec<_>, _>>()?;

        info!("Starting bluetooth scan for {:?}", services);
        let mut scan_stream = self.adapter.scan(&services).await?;

        let scan = async {
            while let Some(discovered) = scan_stream.next().await {
                let name = discovered
                    .adv_data
                    .local_name
                    .clone()
                    .or_else(|| discovered.device.name().ok());
                let advertised: Vec<String> = discovered
                    .adv_data
                    .services
                    .iter()
                    .map(|uuid| uuid.to_string())
                    .collect();
                debug!("Found device - Name: {:?}, RSSI: {:?}", name, discovered.rssi);

                if options.matches(name.as_deref(), &advertised) {
                    return Some(discovered);
                }
            }
            info!("Bluetooth scan stream has ended.");
            None
        };

        match tokio::time::timeout(self.scan_timeout, scan).await {
            Ok(Some(found)) => Ok(found),
            Ok(None) => Err(HostError::NoMatchingDevice),
            Err(_) => {
                warn!("No matching device within {:?}", self.scan_timeout);
                Err(HostError::NoMatchingDevice)
            }
        }
    }
}

#[async_trait]
impl HostBleTransport for BluestHost {
    async fn request_device(
        &self,
        options: &RequestDeviceOptions,
    ) -> Result<Arc<dyn HostDevice>, HostError> {
        let found = self.scan_for_match(options).await?;
        let name = found
            .adv_data
            .local_name
            .clone()
            .or_else(|| found.device.name().ok());
        let advertisement = advertisement_of(&found);
        info!(
            "Selected device: ID: {}, Name: {:?}, RSSI: {:?}",
            found.device.id(),
            name,
            found.rssi
        );

        Ok(Arc::new(BluestDevice::new(
            self.adapter.clone(),
            found.device,
            name,
            advertisement,
        )))
    }
}

fn advertisement_of(found: &AdvertisingDevice) -> Advertisement {
    let adv = &found.adv_data;
    let advertised_services = if adv.services.is_empty() {
        None
    } else {
        Some(adv.services.iter().map(|uuid| uuid.to_string()).collect())
    };
    let manufacturer_data = adv.manufacturer_data.as_ref().map(|data| {
        let mut by_company = BTreeMap::new();
        by_company.insert(data.company_id.to_string(), codec::encode(&data.data));
        by_company
    });

    Advertisement {
        advertised_services,
        manufacturer_data,
        tx_power: adv.tx_power_level,
        rssi: found.rssi,
    }
}
