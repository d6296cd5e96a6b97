//! Remote control channel
//! The bridge joins one topic, receives named commands and pushes named
//! results back. Any transport that can do that implements [`MessageChannel`].

mod stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::bluetooth::Advertisement;
use crate::error::ChannelError;

pub use stdio::StdioChannel;

/// One named message with its JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn join(&self, topic: &str) -> Result<(), ChannelError>;

    async fn push(&self, event: &str, payload: Value) -> Result<(), ChannelError>;

    /// Next inbound frame, or `None` once the channel is closed.
    async fn recv(&self) -> Option<Frame>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceFound {
    pub name: Option<String>,
    pub device_id: String,
    pub advertised_services: Option<Vec<String>>,
    pub manufacture_data: Option<std::collections::BTreeMap<String, String>>,
    pub tx_power: Option<i16>,
    pub rssi: Option<i16>,
}

impl DeviceFound {
    pub fn new(device_id: &str, name: Option<String>, advertisement: Advertisement) -> Self {
        Self {
            name,
            device_id: device_id.to_string(),
            advertised_services: advertisement.advertised_services,
            manufacture_data: advertisement.manufacturer_data,
            tx_power: advertisement.tx_power,
            rssi: advertisement.rssi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRef {
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRef {
    pub device_id: String,
    pub service_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacteristicRef {
    pub device_id: String,
    pub service_uuid: String,
    pub characteristic_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacteristicValue {
    pub device_id: String,
    pub service_uuid: String,
    pub characteristic_uuid: String,
    pub characteristic_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub error_reason: String,
    pub error_code: String,
    pub failed_event: String,
    pub event_payload: Value,
}

/// Every message the bridge sends to the remote peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum OutboundMessage {
    DeviceFound(DeviceFound),
    DeviceConnected(DeviceRef),
    DeviceDisconnected(DeviceRef),
    ServiceFound(ServiceRef),
    CharacteristicFound(CharacteristicRef),
    CharacteristicValueRead(CharacteristicValue),
    CharacteristicValueWritten(CharacteristicValue),
    NotificationsStarted(CharacteristicRef),
    NotificationsStopped(CharacteristicRef),
    NotificationReceived(CharacteristicValue),
    Error(ErrorReport),
}

impl OutboundMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::DeviceFound(_) => "device_found",
            Self::DeviceConnected(_) => "device_connected",
            Self::DeviceDisconnected(_) => "device_disconnected",
            Self::ServiceFound(_) => "service_found",
            Self::CharacteristicFound(_) => "characteristic_found",
            Self::CharacteristicValueRead(_) => "characteristic_value_read",
            Self::CharacteristicValueWritten(_) => "characteristic_value_written",
            Self::NotificationsStarted(_) => "notifications_started",
            Self::NotificationsStopped(_) => "notifications_stopped",
            Self::NotificationReceived(_) => "notification_received",
            Self::Error(_) => "error",
        }
    }

    /// Splits the message into its event name and JSON payload.
    pub fn into_frame(self) -> Result<Frame, ChannelError> {
        let frame: Frame = serde_json::from_value(serde_json::to_value(&self)?)?;
        Ok(frame)
    }
}
