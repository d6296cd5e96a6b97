//! In-memory host stack and channel used by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};

use ble_channel_bridge_lib::channel::{Frame, MessageChannel};
use ble_channel_bridge_lib::config::AppConfig;
use ble_channel_bridge_lib::core::Bridge;
use ble_channel_bridge_lib::core::bluetooth::{
    Advertisement, GattCharacteristic, GattServer, GattService, HostBleTransport, HostDevice,
    RequestDeviceOptions, ValueStream,
};
use ble_channel_bridge_lib::error::{ChannelError, HostError};

pub struct FakeCharacteristic {
    uuid: String,
    pub value: Mutex<Vec<u8>>,
    pub written: Mutex<Vec<Vec<u8>>>,
    pub reads: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub fail_read: AtomicBool,
    pub fail_stop: AtomicBool,
    sender: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl FakeCharacteristic {
    pub fn new(uuid: &str) -> Arc<Self> {
        Arc::new(Self {
            uuid: uuid.to_string(),
            value: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            fail_read: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            sender: Mutex::new(None),
        })
    }

    /// Simulates a value change reported by the device.
    pub fn notify(&self, value: &[u8]) -> bool {
        match self.sender.lock().unwrap().as_ref() {
            Some(sender) => sender.send(value.to_vec()).is_ok(),
            None => false,
        }
    }

    pub fn host_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
            + self.starts.load(Ordering::SeqCst)
            + self.stops.load(Ordering::SeqCst)
            + self.written.lock().unwrap().len()
    }
}

#[async_trait]
impl GattCharacteristic for FakeCharacteristic {
    fn uuid(&self) -> String {
        self.uuid.clone()
    }

    async fn read_value(&self) -> Result<Vec<u8>, HostError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_read.load(Ordering::SeqCst) {
            return Err(HostError::Stack("read rejected".into()));
        }
        Ok(self.value.lock().unwrap().clone())
    }

    async fn write_value(&self, value: &[u8]) -> Result<(), HostError> {
        self.written.lock().unwrap().push(value.to_vec());
        *self.value.lock().unwrap() = value.to_vec();
        Ok(())
    }

    async fn start_notifications(&self) -> Result<ValueStream, HostError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        // Subscribing is a round trip on a real host.
        tokio::task::yield_now().await;
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        Ok(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|value| (value, rx))
        })
        .boxed())
    }

    async fn stop_notifications(&self) -> Result<(), HostError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(HostError::Stack("stop rejected".into()));
        }
        self.sender.lock().unwrap().take();
        Ok(())
    }
}

pub struct FakeService {
    uuid: String,
    characteristics: HashMap<String, Arc<FakeCharacteristic>>,
    pub discoveries: AtomicUsize,
}

impl FakeService {
    pub fn new(uuid: &str, characteristics: &[Arc<FakeCharacteristic>]) -> Arc<Self> {
        Arc::new(Self {
            uuid: uuid.to_string(),
            characteristics: characteristics
                .iter()
                .map(|c| (c.uuid.clone(), c.clone()))
                .collect(),
            discoveries: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl GattService for FakeService {
    fn uuid(&self) -> String {
        self.uuid.clone()
    }

    async fn get_characteristic(
        &self,
        uuid: &str,
    ) -> Result<Arc<dyn GattCharacteristic>, HostError> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.characteristics
            .get(uuid)
            .map(|c| c.clone() as Arc<dyn GattCharacteristic>)
            .ok_or_else(|| HostError::AttributeNotFound {
                kind: "characteristic",
                uuid: uuid.to_string(),
            })
    }
}

pub struct FakeServer {
    services: HashMap<String, Arc<FakeService>>,
    pub discoveries: AtomicUsize,
    pub disconnects: AtomicUsize,
    link_lost: watch::Sender<bool>,
}

impl FakeServer {
    pub fn new(services: &[Arc<FakeService>]) -> Arc<Self> {
        let (link_lost, _) = watch::channel(false);
        Arc::new(Self {
            services: services
                .iter()
                .map(|s| (s.uuid.clone(), s.clone()))
                .collect(),
            discoveries: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            link_lost,
        })
    }

    /// Simulates the device dropping the link.
    pub fn drop_link(&self) {
        self.link_lost.send_replace(true);
    }
}

#[async_trait]
impl GattServer for FakeServer {
    async fn get_primary_service(&self, uuid: &str) -> Result<Arc<dyn GattService>, HostError> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.services
            .get(uuid)
            .map(|s| s.clone() as Arc<dyn GattService>)
            .ok_or_else(|| HostError::AttributeNotFound {
                kind: "service",
                uuid: uuid.to_string(),
            })
    }

    async fn disconnect(&self) -> Result<(), HostError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.link_lost.send_replace(true);
        Ok(())
    }

    async fn disconnected(&self) {
        let mut link_lost = self.link_lost.subscribe();
        let _ = link_lost.wait_for(|lost| *lost).await;
    }
}

pub struct FakeDevice {
    id: String,
    name: Option<String>,
    advertisement: Advertisement,
    pub server: Arc<FakeServer>,
    pub connects: AtomicUsize,
    pub fail_connect: AtomicBool,
}

impl FakeDevice {
    pub fn new(id: &str, name: Option<&str>, server: Arc<FakeServer>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            name: name.map(str::to_string),
            advertisement: Advertisement::default(),
            server,
            connects: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
        })
    }

    pub fn with_advertisement(
        id: &str,
        name: Option<&str>,
        advertisement: Advertisement,
        server: Arc<FakeServer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            name: name.map(str::to_string),
            advertisement,
            server,
            connects: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl HostDevice for FakeDevice {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn advertisement(&self) -> Advertisement {
        self.advertisement.clone()
    }

    async fn connect(&self) -> Result<Arc<dyn GattServer>, HostError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(HostError::Stack("connection refused".into()));
        }
        self.server.link_lost.send_replace(false);
        Ok(self.server.clone())
    }
}

#[derive(Default)]
pub struct FakeHost {
    devices: Mutex<Vec<Arc<FakeDevice>>>,
    pub requests: AtomicUsize,
}

impl FakeHost {
    pub fn new(devices: &[Arc<FakeDevice>]) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices.to_vec()),
            requests: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl HostBleTransport for FakeHost {
    async fn request_device(
        &self,
        options: &RequestDeviceOptions,
    ) -> Result<Arc<dyn HostDevice>, HostError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let devices = self.devices.lock().unwrap().clone();
        devices
            .into_iter()
            .find(|device| {
                let advertised = device
                    .advertisement
                    .advertised_services
                    .clone()
                    .unwrap_or_default();
                options.matches(device.name.as_deref(), &advertised)
            })
            .map(|device| device as Arc<dyn HostDevice>)
            .ok_or(HostError::NoMatchingDevice)
    }
}

/// Channel that records every push and serves queued inbound frames.
pub struct RecordingChannel {
    pub joined: Mutex<Vec<String>>,
    pushed: Mutex<Vec<(String, Value)>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            joined: Mutex::new(Vec::new()),
            pushed: Mutex::new(Vec::new()),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
        })
    }

    pub fn send_inbound(&self, event: &str, payload: Value) {
        if let Some(tx) = self.inbound_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Frame {
                event: event.to_string(),
                payload,
            });
        }
    }

    /// Ends the inbound stream once queued frames are drained.
    pub fn close(&self) {
        self.inbound_tx.lock().unwrap().take();
    }

    pub fn events(&self) -> Vec<String> {
        self.pushed
            .lock()
            .unwrap()
            .iter()
            .map(|(event, _)| event.clone())
            .collect()
    }

    pub fn payloads(&self, event: &str) -> Vec<Value> {
        self.pushed
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.payloads(event).len()
    }

    /// Polls until `count` messages named `event` were pushed.
    pub async fn wait_for(&self, event: &str, count: usize) -> Vec<Value> {
        for _ in 0..200 {
            if self.count(event) >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.payloads(event)
    }

    pub fn clear(&self) {
        self.pushed.lock().unwrap().clear();
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    async fn join(&self, topic: &str) -> Result<(), ChannelError> {
        self.joined.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    async fn push(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
        self.pushed
            .lock()
            .unwrap()
            .push((event.to_string(), payload));
        Ok(())
    }

    async fn recv(&self) -> Option<Frame> {
        self.inbound_rx.lock().await.recv().await
    }
}

/// One device `d1` exposing service `s1` with characteristics `c1` and `c2`.
pub struct Rig {
    pub bridge: Bridge,
    pub host: Arc<FakeHost>,
    pub channel: Arc<RecordingChannel>,
    pub device: Arc<FakeDevice>,
    pub server: Arc<FakeServer>,
    pub service: Arc<FakeService>,
    pub c1: Arc<FakeCharacteristic>,
    pub c2: Arc<FakeCharacteristic>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let c1 = FakeCharacteristic::new("c1");
        let c2 = FakeCharacteristic::new("c2");
        let service = FakeService::new("s1", &[c1.clone(), c2.clone()]);
        let server = FakeServer::new(&[service.clone()]);
        let device = FakeDevice::new("d1", Some("Thermometer"), server.clone());
        let host = FakeHost::new(&[device.clone()]);
        let channel = RecordingChannel::new();
        let bridge = Bridge::new(config, host.clone(), channel.clone()).unwrap();
        Self {
            bridge,
            host,
            channel,
            device,
            server,
            service,
            c1,
            c2,
        }
    }

    /// Selects and connects `d1`, then discovers `s1`.
    pub async fn connected(&self) {
        self.bridge.request_device(&json!({})).await.unwrap();
        self.bridge
            .handle(
                ble_channel_bridge_lib::CommandKind::ConnectDevice,
                json!({"device_id": "d1"}),
            )
            .await;
        self.bridge
            .handle(
                ble_channel_bridge_lib::CommandKind::DiscoverService,
                json!({"device_id": "d1", "service_uuid": "s1"}),
            )
            .await;
    }

    /// Connected with both characteristics discovered.
    pub async fn discovered(&self) {
        self.connected().await;
        for uuid in ["c1", "c2"] {
            self.bridge
                .handle(
                    ble_channel_bridge_lib::CommandKind::DiscoverCharacteristic,
                    target(uuid),
                )
                .await;
        }
        self.channel.clear();
    }
}

pub fn target(characteristic_uuid: &str) -> Value {
    json!({
        "device_id": "d1",
        "service_uuid": "s1",
        "characteristic_uuid": characteristic_uuid,
    })
}
