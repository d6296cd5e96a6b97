//! Constants used by the host Bluetooth stack.

use uuid::Uuid;

use crate::error::HostError;

/// Default time spent scanning for a device that matches a request, in milliseconds
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 10_000;

/// Bluetooth base UUID, used to expand 16 and 32 bit short forms
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x00000000_0000_1000_8000_00805f9b34fb);

/// Parses a UUID string, accepting the short forms `"180f"`, `"0x180F"` and `"0000180f"`.
pub fn expand_uuid(input: &str) -> Result<Uuid, HostError> {
    let trimmed = input.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if matches!(hex.len(), 4 | 8) {
        let short = u32::from_str_radix(hex, 16)
            .map_err(|_| HostError::InvalidUuid(input.to_string()))?;
        return Ok(Uuid::from_u128(
            BLUETOOTH_BASE_UUID.as_u128() | ((short as u128) << 96),
        ));
    }

    Uuid::parse_str(hex).map_err(|_| HostError::InvalidUuid(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_short_forms() {
        let battery = "0000180f-0000-1000-8000-00805f9b34fb";
        assert_eq!(expand_uuid("180f").unwrap().to_string(), battery);
        assert_eq!(expand_uuid("0x180F").unwrap().to_string(), battery);
        assert_eq!(expand_uuid("0000180f").unwrap().to_string(), battery);
        assert_eq!(expand_uuid(battery).unwrap().to_string(), battery);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(expand_uuid("zzzz"), Err(HostError::InvalidUuid(_))));
        assert!(expand_uuid("12345").is_err());
    }
}
