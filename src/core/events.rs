//! Lifecycle events surfaced to the embedding adapter

use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    UserApproval,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::UserApproval => "user_approval",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Connected { device_id: String },
    Disconnected { device_id: String },
    /// Raw `request_device` payload awaiting the user's decision
    UserApproval(Value),
    /// Same payload as the outbound `error` message
    Error(Value),
}

impl BridgeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::UserApproval(_) => EventKind::UserApproval,
            Self::Error(_) => EventKind::Error,
        }
    }
}

pub type EventCallback = Arc<dyn Fn(&BridgeEvent) + Send + Sync>;

/// Callback registry keyed by event kind.
#[derive(Default)]
pub struct EventHub {
    listeners: Mutex<Vec<(EventKind, EventCallback)>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((kind, Arc::new(callback)));
        }
    }

    /// Calls every listener registered for the event's kind.
    /// Returns how many were called.
    pub fn emit(&self, event: BridgeEvent) -> usize {
        let kind = event.kind();
        // Callbacks run outside the lock so they may register listeners themselves.
        let targets: Vec<EventCallback> = match self.listeners.lock() {
            Ok(listeners) => listeners
                .iter()
                .filter(|(registered, _)| *registered == kind)
                .map(|(_, callback)| callback.clone())
                .collect(),
            Err(_) => return 0,
        };
        for callback in &targets {
            callback(&event);
        }
        targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emits_only_to_matching_listeners() {
        let hub = EventHub::new();
        let connected = Arc::new(AtomicUsize::new(0));
        let counter = connected.clone();
        hub.on(EventKind::Connected, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let delivered = hub.emit(BridgeEvent::Connected {
            device_id: "d1".into(),
        });
        assert_eq!(delivered, 1);
        assert_eq!(
            hub.emit(BridgeEvent::Disconnected {
                device_id: "d1".into()
            }),
            0
        );
        assert_eq!(connected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn event_names() {
        assert_eq!(EventKind::UserApproval.to_string(), "user_approval");
        assert_eq!(BridgeEvent::Error(Value::Null).kind(), EventKind::Error);
    }
}
