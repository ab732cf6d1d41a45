//! Protocol constants and the MAC address type.

use std::fmt;
use std::str::FromStr;

/// UDP port used for both the local bind and the broadcast target.
pub const UDP_PORT: u16 = 11530;

/// First byte of every frame.
pub const FRAME_MAGIC: u8 = 0xA1;
/// Second byte of every outgoing command frame.
pub const FRAME_SUB_TYPE: u8 = 0x04;
pub const HEADER_SIZE: usize = 16;

/// Bytes counted by the content-length field beyond the payload itself.
pub(crate) const CONTENT_LENGTH_BIAS: usize = 7;
/// Offset the content-length bound is measured from.
pub(crate) const CONTENT_LENGTH_BASE: usize = 9;

pub const STATE_PAYLOAD_SIZE: usize = 33;
/// Bytes 1..3 of a telemetry payload.
pub(crate) const STATE_SIGNATURE: [u8; 2] = [0x5A, 0xA1];

/// Six-byte device hardware address, displayed as `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for MacAddress {
    type Err = String;

    /// Accepts `AA:BB:CC:DD:EE:FF`, `AA-BB-...` or bare `AABBCCDDEEFF`, any case.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let compact: String = s.trim().chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes = hex::decode(&compact).map_err(|e| format!("Invalid MAC address '{s}': {e}"))?;
        let octets: [u8; 6] = bytes
            .try_into()
            .map_err(|_| format!("Invalid MAC address '{s}': expected 6 bytes"))?;
        Ok(Self(octets))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_display_uppercase() {
        let mac = MacAddress([0xaa, 0xbb, 0x0c, 0xdd, 0xee, 0x0f]);
        assert_eq!(mac.to_string(), "AA:BB:0C:DD:EE:0F");
    }

    #[test]
    fn test_mac_parse_formats() {
        let expected = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!("AA:BB:CC:DD:EE:FF".parse::<MacAddress>().unwrap(), expected);
        assert_eq!("aabbccddeeff".parse::<MacAddress>().unwrap(), expected);
        assert_eq!("aa-bb-cc-dd-ee-ff".parse::<MacAddress>().unwrap(), expected);
    }

    #[test]
    fn test_mac_parse_rejects_bad_input() {
        assert!("AA:BB:CC".parse::<MacAddress>().is_err());
        assert!("GG:BB:CC:DD:EE:FF".parse::<MacAddress>().is_err());
    }
}
