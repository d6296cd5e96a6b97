//! Core of the BLE channel bridge
//! Host stack abstraction, device registry, notification tracking and command routing.

pub mod bluetooth;
pub mod codec;
pub mod error_reporter;
pub mod events;
pub mod gate;
pub mod notification;
pub mod registry;
pub mod router;

// Re-export commonly used types
pub use events::{BridgeEvent, EventHub, EventKind};
pub use notification::NotificationTracker;
pub use registry::{CharacteristicKey, DeviceInfo, DeviceRegistry};
pub use router::Bridge;
