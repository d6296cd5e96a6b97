//! Failure reporting
//! Turns a command failure into an outbound `error` message and an `error` event.

use std::sync::Arc;

use log::{error, warn};
use serde_json::Value;

use crate::channel::{ErrorReport, MessageChannel, OutboundMessage};
use crate::core::events::{BridgeEvent, EventHub};
use crate::error::BridgeError;

#[derive(Clone)]
pub struct ErrorReporter {
    channel: Arc<dyn MessageChannel>,
    events: Arc<EventHub>,
}

impl ErrorReporter {
    pub fn new(channel: Arc<dyn MessageChannel>, events: Arc<EventHub>) -> Self {
        Self { channel, events }
    }

    /// Pushes `error` to the peer and raises the `error` event with the same payload.
    /// A failing push is logged; the event is raised regardless.
    pub async fn report(
        &self,
        err: &BridgeError,
        error_code: &str,
        failed_event: &str,
        event_payload: Value,
    ) {
        warn!("{} failed ({}): {}", failed_event, error_code, err);

        let message = OutboundMessage::Error(ErrorReport {
            error_reason: err.to_string(),
            error_code: error_code.to_string(),
            failed_event: failed_event.to_string(),
            event_payload,
        });

        let payload = match message.into_frame() {
            Ok(frame) => frame.payload,
            Err(e) => {
                error!("Failed to encode error report: {}", e);
                return;
            }
        };

        if let Err(e) = self.channel.push("error", payload.clone()).await {
            error!("Failed to push error report: {}", e);
        }
        self.events.emit(BridgeEvent::Error(payload));
    }
}
