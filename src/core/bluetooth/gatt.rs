//! Service and characteristic handles backed by bluest

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bluest::{Characteristic, Service};
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::core::bluetooth::constants::expand_uuid;
use crate::core::bluetooth::{GattCharacteristic, GattService, ValueStream};
use crate::error::HostError;

pub struct BluestService {
    inner: Service,
}

impl BluestService {
    pub fn new(inner: Service) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl GattService for BluestService {
    fn uuid(&self) -> String {
        self.inner.uuid().to_string()
    }

    async fn get_characteristic(
        &self,
        uuid: &str,
    ) -> Result<Arc<dyn GattCharacteristic>, HostError> {
        let target = expand_uuid(uuid)?;
        let characteristics = self.inner.discover_characteristics_with_uuid(target).await?;
        let characteristic =
            characteristics
                .into_iter()
                .next()
                .ok_or_else(|| HostError::AttributeNotFound {
                    kind: "characteristic",
                    uuid: uuid.to_string(),
                })?;
        info!("Found characteristic: {}", characteristic.uuid());
        Ok(Arc::new(BluestCharacteristic::new(characteristic)))
    }
}

pub struct BluestCharacteristic {
    inner: Characteristic,
    /// Task pumping the bluest notify stream; bluest unsubscribes when it is dropped
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl BluestCharacteristic {
    pub fn new(inner: Characteristic) -> Self {
        Self {
            inner,
            subscription: Mutex::new(None),
        }
    }

    fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .map(|guard| guard.as_ref().map(|task| !task.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }
}

#[async_trait]
impl GattCharacteristic for BluestCharacteristic {
    fn uuid(&self) -> String {
        self.inner.uuid().to_string()
    }

    async fn read_value(&self) -> Result<Vec<u8>, HostError> {
        Ok(self.inner.read().await?)
    }

    async fn write_value(&self, value: &[u8]) -> Result<(), HostError> {
        Ok(self.inner.write(value).await?)
    }

    async fn start_notifications(&self) -> Result<ValueStream, HostError> {
        if self.is_subscribed() {
            return Err(HostError::AlreadyNotifying(self.uuid()));
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (value_tx, value_rx) = mpsc::unbounded_channel();
        let characteristic = self.inner.clone();

        let task = tokio::spawn(async move {
            let mut notification_stream = match characteristic.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(HostError::from(e)));
                    return;
                }
            };
            while let Some(result) = notification_stream.next().await {
                match result {
                    Ok(value) => {
                        debug!("Received value from {}: {:?}", characteristic.uuid(), value);
                        if value_tx.send(value).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error in notification stream: {}", e);
                        break;
                    }
                }
            }
            info!("Notification stream for {} ended", characteristic.uuid());
        });

        ready_rx.await.map_err(|_| HostError::Disconnected)??;
        if let Ok(mut guard) = self.subscription.lock() {
            *guard = Some(task);
        }

        let values = futures_util::stream::unfold(value_rx, |mut rx| async move {
            rx.recv().await.map(|value| (value, rx))
        });
        Ok(values.boxed())
    }

    async fn stop_notifications(&self) -> Result<(), HostError> {
        let task = self
            .subscription
            .lock()
            .map_err(|_| HostError::Stack("subscription state poisoned".into()))?
            .take();
        match task {
            Some(task) => {
                task.abort();
                Ok(())
            }
            None => Err(HostError::Stack(format!(
                "notifications not active on {}",
                self.uuid()
            ))),
        }
    }
}
