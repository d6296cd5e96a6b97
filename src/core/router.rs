//! Command routing
//! [`Bridge`] turns inbound channel commands into host Bluetooth calls, keeps
//! the registry in step and answers every command exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{
    CharacteristicRef, CharacteristicValue, DeviceFound, DeviceRef, Frame, MessageChannel,
    OutboundMessage, ServiceRef,
};
use crate::commands::{
    CharacteristicTarget, Command, CommandKind, DeviceTarget, ServiceTarget, WriteTarget,
};
use crate::config::AppConfig;
use crate::core::bluetooth::{GattServer, HostBleTransport, RequestDeviceOptions};
use crate::core::codec;
use crate::core::error_reporter::ErrorReporter;
use crate::core::events::{BridgeEvent, EventHub, EventKind};
use crate::core::gate::OperationGate;
use crate::core::notification::NotificationTracker;
use crate::core::registry::{CharacteristicKey, DeviceInfo, DeviceRegistry};
use crate::error::{BridgeError, ChannelError, Result};

/// A running bridge instance. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: AppConfig,
    host: Arc<dyn HostBleTransport>,
    channel: Arc<dyn MessageChannel>,
    registry: Arc<DeviceRegistry>,
    notifications: NotificationTracker,
    events: Arc<EventHub>,
    reporter: ErrorReporter,
    gate: OperationGate,
    /// Host-disconnect watchers of live connections, by device id
    watchers: Mutex<HashMap<String, CancellationToken>>,
}

impl Bridge {
    /// Builds a bridge. Fails with `Construction` when the config is invalid.
    pub fn new(
        config: AppConfig,
        host: Arc<dyn HostBleTransport>,
        channel: Arc<dyn MessageChannel>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(DeviceRegistry::new());
        let events = Arc::new(EventHub::new());
        let reporter = ErrorReporter::new(channel.clone(), events.clone());
        let notifications = NotificationTracker::new(registry.clone(), reporter.clone());
        let gate = OperationGate::new(config.bridge.serialize_characteristic_ops);
        if gate.is_enabled() {
            info!("Characteristic operations are serialized per characteristic");
        }

        Ok(Self {
            inner: Arc::new(BridgeInner {
                config,
                host,
                channel,
                registry,
                notifications,
                events,
                reporter,
                gate,
                watchers: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Registers a lifecycle callback.
    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, callback);
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    pub fn notifications(&self) -> &NotificationTracker {
        &self.inner.notifications
    }

    /// Joins the configured topic and handles inbound frames until the channel closes.
    pub async fn serve(&self) -> std::result::Result<(), ChannelError> {
        let topic = &self.inner.config.channel.topic;
        self.inner.channel.join(topic).await?;
        info!("Bridge serving on {}", topic);

        while let Some(frame) = self.inner.channel.recv().await {
            self.dispatch_frame(frame);
        }

        info!("Channel closed, bridge stopping");
        Ok(())
    }

    /// Starts handling one inbound frame on its own task.
    /// Frames with an unknown event name are ignored.
    pub fn dispatch_frame(&self, frame: Frame) -> Option<JoinHandle<()>> {
        let Some(kind) = CommandKind::from_event_name(&frame.event) else {
            warn!("Ignoring unknown event {:?}", frame.event);
            return None;
        };
        let bridge = self.clone();
        Some(tokio::spawn(async move {
            bridge.handle(kind, frame.payload).await;
        }))
    }

    /// Handles one command to completion. Failures are reported over the
    /// channel with the command's error code and never escape.
    pub async fn handle(&self, kind: CommandKind, payload: Value) {
        debug!("Handling {} {}", kind, payload);
        let result = match Command::parse(kind, &payload) {
            Ok(command) => self.execute(command.normalized()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.inner
                .reporter
                .report(&e, kind.error_code(), kind.event_name(), payload)
                .await;
        }
    }

    async fn execute(&self, command: Command) -> Result<()> {
        match command {
            Command::RequestDevice(payload) => self.forward_request(payload),
            Command::ConnectDevice(target) => self.connect_device(target).await,
            Command::DisconnectDevice(target) => self.disconnect_device(target).await,
            Command::DiscoverService(target) => self.discover_service(target).await,
            Command::DiscoverCharacteristic(target) => self.discover_characteristic(target).await,
            Command::ReadCharacteristicValue(target) => self.read_value(target).await,
            Command::WriteCharacteristicValue(write) => self.write_value(write).await,
            Command::StartNotifications(target) => self.start_notifications(target).await,
            Command::StopNotifications(target) => self.stop_notifications(target).await,
        }
    }

    fn forward_request(&self, payload: Value) -> Result<()> {
        let listeners = self.inner.events.emit(BridgeEvent::UserApproval(payload));
        if listeners == 0 {
            warn!("Device request received but nothing listens for user_approval");
        }
        Ok(())
    }

    /// Selects a device through the host after the user approved a request.
    ///
    /// The payload is the one carried by the `user_approval` event. On success
    /// the device is registered and announced with `device_found`; failures are
    /// reported with the `request_device` code and also returned.
    pub async fn request_device(&self, payload: &Value) -> Result<DeviceInfo> {
        let options = RequestDeviceOptions::from_payload(payload);
        let device = match self.inner.host.request_device(&options).await {
            Ok(device) => device,
            Err(e) => {
                let err = BridgeError::operation("request_device", e);
                let kind = CommandKind::RequestDevice;
                self.inner
                    .reporter
                    .report(&err, kind.error_code(), kind.event_name(), payload.clone())
                    .await;
                return Err(err);
            }
        };

        let info = self.inner.registry.upsert_device(device);
        info!("Device {} ({:?}) selected", info.id, info.name);
        self.send(OutboundMessage::DeviceFound(DeviceFound::new(
            &info.id,
            info.name.clone(),
            info.advertisement.clone(),
        )))
        .await;
        Ok(info)
    }

    async fn connect_device(&self, target: DeviceTarget) -> Result<()> {
        let device_id = target.device_id;
        let device = self.inner.registry.device_handle(&device_id)?;

        if self.teardown_connection(&device_id, None).await {
            info!("Reconnecting {}, previous connection closed", device_id);
        }

        let server = device
            .connect()
            .await
            .map_err(|e| BridgeError::operation("connect", e))?;
        let epoch = self.inner.registry.attach_server(&device_id, server.clone())?;
        self.spawn_disconnect_watcher(device_id.clone(), epoch, server);

        self.send(OutboundMessage::DeviceConnected(DeviceRef {
            device_id: device_id.clone(),
        }))
        .await;
        self.inner
            .events
            .emit(BridgeEvent::Connected { device_id });
        Ok(())
    }

    async fn disconnect_device(&self, target: DeviceTarget) -> Result<()> {
        let device_id = target.device_id;
        self.inner.registry.get_device(&device_id)?;
        if !self.teardown_connection(&device_id, None).await {
            return Err(BridgeError::NotFound(format!(
                "device {} is not connected",
                device_id
            )));
        }
        Ok(())
    }

    async fn discover_service(&self, target: ServiceTarget) -> Result<()> {
        let (_, fresh) = self
            .inner
            .registry
            .get_or_discover_service(&target.device_id, &target.service_uuid)
            .await?;
        debug!(
            "Service {} on {} ({})",
            target.service_uuid,
            target.device_id,
            if fresh { "discovered" } else { "cached" }
        );
        self.send(OutboundMessage::ServiceFound(ServiceRef {
            device_id: target.device_id,
            service_uuid: target.service_uuid,
        }))
        .await;
        Ok(())
    }

    async fn discover_characteristic(&self, target: CharacteristicTarget) -> Result<()> {
        let key = target.key();
        let (_, fresh) = self
            .inner
            .registry
            .get_or_discover_characteristic(&key)
            .await?;
        debug!(
            "Characteristic {} ({})",
            key,
            if fresh { "discovered" } else { "cached" }
        );
        self.send(OutboundMessage::CharacteristicFound(characteristic_ref(
            target,
        )))
        .await;
        Ok(())
    }

    async fn read_value(&self, target: CharacteristicTarget) -> Result<()> {
        let key = target.key();
        let characteristic = self.inner.registry.characteristic(&key)?;
        let _turn = self.inner.gate.enter(&key).await;

        let value = characteristic
            .read_value()
            .await
            .map_err(|e| BridgeError::operation("read_characteristic_value", e))?;
        debug!("Read {} byte(s) from {}", value.len(), key);

        self.send(OutboundMessage::CharacteristicValueRead(
            CharacteristicValue {
                device_id: target.device_id,
                service_uuid: target.service_uuid,
                characteristic_uuid: target.characteristic_uuid,
                characteristic_value: codec::encode(&value),
            },
        ))
        .await;
        Ok(())
    }

    async fn write_value(&self, write: WriteTarget) -> Result<()> {
        let WriteTarget {
            target,
            characteristic_value,
        } = write;
        let key = target.key();
        let characteristic = self.inner.registry.characteristic(&key)?;
        let bytes = codec::decode(&characteristic_value)?;
        let _turn = self.inner.gate.enter(&key).await;

        characteristic
            .write_value(&bytes)
            .await
            .map_err(|e| BridgeError::operation("write_characteristic_value", e))?;
        debug!("Wrote {} byte(s) to {}", bytes.len(), key);

        self.send(OutboundMessage::CharacteristicValueWritten(
            CharacteristicValue {
                device_id: target.device_id,
                service_uuid: target.service_uuid,
                characteristic_uuid: target.characteristic_uuid,
                characteristic_value,
            },
        ))
        .await;
        Ok(())
    }

    async fn start_notifications(&self, target: CharacteristicTarget) -> Result<()> {
        let key = target.key();
        let characteristic = self.inner.registry.characteristic(&key)?;
        let _turn = self.inner.gate.enter(&key).await;

        if self.inner.registry.is_notifying(&key)? {
            return Err(BridgeError::Operation {
                operation: "start_notifications".into(),
                reason: format!("notifications already active on {}", key),
            });
        }

        let mut values = characteristic
            .start_notifications()
            .await
            .map_err(|e| BridgeError::operation("start_notifications", e))?;

        match self.inner.notifications.mark_active(&key) {
            Ok(true) => {}
            // Another start won the race and owns the host subscription.
            Ok(false) => {
                return Err(BridgeError::Operation {
                    operation: "start_notifications".into(),
                    reason: format!("notifications already active on {}", key),
                });
            }
            // The connection went away while subscribing.
            Err(e) => {
                if let Err(stop_err) = characteristic.stop_notifications().await {
                    warn!("Failed to undo subscription on {}: {}", key, stop_err);
                }
                return Err(e);
            }
        }

        let bridge = self.clone();
        let subscription = key.clone();
        let listener = tokio::spawn(async move {
            while let Some(value) = values.next().await {
                bridge.route_notification(&subscription, &value).await;
            }
            debug!("Value stream of {} ended", subscription);
        });
        self.inner
            .notifications
            .register_listener(key.clone(), listener);
        info!("Notifications started on {}", key);

        self.send(OutboundMessage::NotificationsStarted(characteristic_ref(
            target,
        )))
        .await;
        Ok(())
    }

    async fn stop_notifications(&self, target: CharacteristicTarget) -> Result<()> {
        let key = target.key();
        let characteristic = self.inner.registry.characteristic(&key)?;
        let _turn = self.inner.gate.enter(&key).await;

        if !self.inner.registry.is_notifying(&key)? {
            return Err(BridgeError::NotFound(format!(
                "no active notifications on {}",
                key
            )));
        }

        characteristic
            .stop_notifications()
            .await
            .map_err(|e| BridgeError::operation("stop_notifications", e))?;
        self.inner.notifications.unregister_listener(&key);
        self.inner.notifications.mark_inactive(&key)?;
        info!("Notifications stopped on {}", key);

        self.send(OutboundMessage::NotificationsStopped(characteristic_ref(
            target,
        )))
        .await;
        Ok(())
    }

    /// Forwards one host value change as `notification_received`.
    /// Returns false when the subscription is no longer active.
    pub async fn route_notification(&self, key: &CharacteristicKey, value: &[u8]) -> bool {
        let Some(service_uuid) = self.inner.registry.resolve_subscription(key) else {
            debug!("Dropping value from {}: no active subscription", key);
            return false;
        };

        self.send(OutboundMessage::NotificationReceived(CharacteristicValue {
            device_id: key.device_id.clone(),
            service_uuid,
            characteristic_uuid: key.characteristic_uuid.clone(),
            characteristic_value: codec::encode(value),
        }))
        .await;
        true
    }

    /// Takes the live connection of a device and drops everything scoped to it:
    /// watcher, subscriptions, cached services and operation locks.
    async fn release_connection(
        &self,
        device_id: &str,
        epoch: Option<u64>,
    ) -> Option<Arc<dyn GattServer>> {
        let server = self.inner.registry.claim_connection(device_id, epoch)?;
        let watcher = self.watchers().remove(device_id);
        if let Some(watcher) = watcher {
            watcher.cancel();
        }
        self.inner.notifications.teardown_all(device_id).await;
        self.inner.registry.clear_connection_state(device_id);
        self.inner.gate.forget_device(device_id);
        Some(server)
    }

    /// Runs the disconnect sequence once per connection: stop every
    /// subscription, close the host connection, push `device_disconnected`,
    /// then raise `disconnected`. Returns false if there was nothing to tear down.
    async fn teardown_connection(&self, device_id: &str, epoch: Option<u64>) -> bool {
        let Some(server) = self.release_connection(device_id, epoch).await else {
            return false;
        };

        if let Err(e) = server.disconnect().await {
            error!("Host disconnect of {} failed: {}", device_id, e);
        }
        info!("Device {} disconnected", device_id);

        self.send(OutboundMessage::DeviceDisconnected(DeviceRef {
            device_id: device_id.to_string(),
        }))
        .await;
        self.inner.events.emit(BridgeEvent::Disconnected {
            device_id: device_id.to_string(),
        });
        true
    }

    fn spawn_disconnect_watcher(&self, device_id: String, epoch: u64, server: Arc<dyn GattServer>) {
        let token = CancellationToken::new();
        if let Some(previous) = self.watchers().insert(device_id.clone(), token.clone()) {
            previous.cancel();
        }

        let bridge = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Disconnect watcher of {} cancelled", device_id);
                }
                _ = server.disconnected() => {
                    info!("Host reported {} disconnected", device_id);
                    bridge.teardown_connection(&device_id, Some(epoch)).await;
                }
            }
        });
    }

    fn watchers(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.inner
            .watchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn send(&self, message: OutboundMessage) {
        let frame = match message.into_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode outbound message: {}", e);
                return;
            }
        };
        if let Err(e) = self.inner.channel.push(&frame.event, frame.payload).await {
            error!("Failed to push {}: {}", frame.event, e);
        }
    }
}

fn characteristic_ref(target: CharacteristicTarget) -> CharacteristicRef {
    CharacteristicRef {
        device_id: target.device_id,
        service_uuid: target.service_uuid,
        characteristic_uuid: target.characteristic_uuid,
    }
}
