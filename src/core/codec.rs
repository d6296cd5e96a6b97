//! Wire-text conversion for characteristic values

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::BridgeError;

/// Encodes raw characteristic bytes as base64 wire text.
pub fn encode(raw: &[u8]) -> String {
    STANDARD.encode(raw)
}

/// Decodes base64 wire text back into raw bytes.
pub fn decode(wire: &str) -> Result<Vec<u8>, BridgeError> {
    Ok(STANDARD.decode(wire)?)
}
