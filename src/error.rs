//! Error types for the bridge
//! Request failures are recovered at the command boundary and reported over
//! the channel; only `Construction` is fatal.

use thiserror::Error;

/// Failures raised while serving a command.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A referenced device, service or characteristic is not in the registry.
    #[error("NotFoundError: {0}")]
    NotFound(String),

    /// The host failed to discover a service or characteristic.
    #[error("DiscoveryError: {context}: {reason}")]
    Discovery { context: String, reason: String },

    /// The host failed a connect, read, write or notification call.
    #[error("OperationError: {operation}: {reason}")]
    Operation { operation: String, reason: String },

    /// Malformed wire text or an inbound payload that does not fit its command.
    #[error("CodecError: {0}")]
    Codec(String),

    /// The bridge cannot be built from the given configuration.
    #[error("ConstructionError: {0}")]
    Construction(String),
}

impl BridgeError {
    pub fn discovery(context: impl Into<String>, source: HostError) -> Self {
        Self::Discovery {
            context: context.into(),
            reason: source.to_string(),
        }
    }

    pub fn operation(operation: impl Into<String>, source: HostError) -> Self {
        Self::Operation {
            operation: operation.into(),
            reason: source.to_string(),
        }
    }
}

impl From<base64::DecodeError> for BridgeError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Errors reported by the host Bluetooth stack.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("no Bluetooth adapter available")]
    NoAdapter,

    #[error("no device matched the request filters")]
    NoMatchingDevice,

    #[error("{kind} {uuid} not found")]
    AttributeNotFound { kind: &'static str, uuid: String },

    #[error("invalid UUID {0:?}")]
    InvalidUuid(String),

    #[error("notifications already active on {0}")]
    AlreadyNotifying(String),

    #[error("gatt server disconnected")]
    Disconnected,

    #[error("{0}")]
    Stack(String),
}

#[cfg(feature = "bluest")]
impl From<bluest::Error> for HostError {
    fn from(err: bluest::Error) -> Self {
        Self::Stack(err.to_string())
    }
}

/// Errors raised by the message channel collaborator.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Maps a failed write on the underlying stream. A peer that hung up
    /// shows up as `Closed`.
    pub fn from_write(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::UnexpectedEof => Self::Closed,
            _ => Self::Io(err),
        }
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
