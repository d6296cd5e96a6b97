//! Inbound commands
//! This module defines every command the remote peer can send, with the
//! error code reported when it fails.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::core::registry::CharacteristicKey;
use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    RequestDevice,
    ConnectDevice,
    DisconnectDevice,
    DiscoverService,
    DiscoverCharacteristic,
    ReadCharacteristicValue,
    WriteCharacteristicValue,
    StartNotifications,
    StopNotifications,
}

impl CommandKind {
    pub const ALL: [CommandKind; 9] = [
        Self::RequestDevice,
        Self::ConnectDevice,
        Self::DisconnectDevice,
        Self::DiscoverService,
        Self::DiscoverCharacteristic,
        Self::ReadCharacteristicValue,
        Self::WriteCharacteristicValue,
        Self::StartNotifications,
        Self::StopNotifications,
    ];

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RequestDevice => "request_device",
            Self::ConnectDevice => "connect_device",
            Self::DisconnectDevice => "disconnect_device",
            Self::DiscoverService => "discover_service",
            Self::DiscoverCharacteristic => "discover_characteristic",
            Self::ReadCharacteristicValue => "read_characteristic_value",
            Self::WriteCharacteristicValue => "write_characteristic_value",
            Self::StartNotifications => "start_notifications",
            Self::StopNotifications => "stop_notifications",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.event_name() == name)
    }

    /// Code carried by the `error` message when this command fails.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RequestDevice => "01",
            Self::ConnectDevice => "02",
            Self::DisconnectDevice => "03",
            Self::DiscoverService => "04",
            Self::DiscoverCharacteristic => "05",
            Self::StartNotifications => "08",
            Self::StopNotifications => "09",
            Self::ReadCharacteristicValue => "10",
            Self::WriteCharacteristicValue => "11",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceTarget {
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceTarget {
    pub device_id: String,
    pub service_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CharacteristicTarget {
    pub device_id: String,
    pub service_uuid: String,
    pub characteristic_uuid: String,
}

impl CharacteristicTarget {
    pub fn key(&self) -> CharacteristicKey {
        CharacteristicKey::new(
            self.device_id.clone(),
            self.service_uuid.clone(),
            self.characteristic_uuid.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WriteTarget {
    #[serde(flatten)]
    pub target: CharacteristicTarget,
    pub characteristic_value: String,
}

/// A parsed inbound command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    RequestDevice(Value),
    ConnectDevice(DeviceTarget),
    DisconnectDevice(DeviceTarget),
    DiscoverService(ServiceTarget),
    DiscoverCharacteristic(CharacteristicTarget),
    ReadCharacteristicValue(CharacteristicTarget),
    WriteCharacteristicValue(WriteTarget),
    StartNotifications(CharacteristicTarget),
    StopNotifications(CharacteristicTarget),
}

impl Command {
    /// Parses the payload of a command of the given kind.
    pub fn parse(kind: CommandKind, payload: &Value) -> Result<Self, BridgeError> {
        fn fields<T: for<'de> Deserialize<'de>>(
            kind: CommandKind,
            payload: &Value,
        ) -> Result<T, BridgeError> {
            T::deserialize(payload)
                .map_err(|e| BridgeError::Codec(format!("invalid {} payload: {}", kind, e)))
        }

        Ok(match kind {
            CommandKind::RequestDevice => Self::RequestDevice(payload.clone()),
            CommandKind::ConnectDevice => Self::ConnectDevice(fields(kind, payload)?),
            CommandKind::DisconnectDevice => Self::DisconnectDevice(fields(kind, payload)?),
            CommandKind::DiscoverService => Self::DiscoverService(fields(kind, payload)?),
            CommandKind::DiscoverCharacteristic => {
                Self::DiscoverCharacteristic(fields(kind, payload)?)
            }
            CommandKind::ReadCharacteristicValue => {
                Self::ReadCharacteristicValue(fields(kind, payload)?)
            }
            CommandKind::WriteCharacteristicValue => {
                Self::WriteCharacteristicValue(fields(kind, payload)?)
            }
            CommandKind::StartNotifications => Self::StartNotifications(fields(kind, payload)?),
            CommandKind::StopNotifications => Self::StopNotifications(fields(kind, payload)?),
        })
    }

    /// Lower-cases every UUID so differently-cased requests share cache entries.
    pub fn normalized(self) -> Self {
        match self {
            Self::DiscoverService(mut target) => {
                target.service_uuid = target.service_uuid.to_lowercase();
                Self::DiscoverService(target)
            }
            Self::DiscoverCharacteristic(target) => Self::DiscoverCharacteristic(lower(target)),
            Self::ReadCharacteristicValue(target) => Self::ReadCharacteristicValue(lower(target)),
            Self::WriteCharacteristicValue(mut write) => {
                write.target = lower(write.target);
                Self::WriteCharacteristicValue(write)
            }
            Self::StartNotifications(target) => Self::StartNotifications(lower(target)),
            Self::StopNotifications(target) => Self::StopNotifications(lower(target)),
            other => other,
        }
    }
}

fn lower(mut target: CharacteristicTarget) -> CharacteristicTarget {
    target.service_uuid = target.service_uuid.to_lowercase();
    target.characteristic_uuid = target.characteristic_uuid.to_lowercase();
    target
}
