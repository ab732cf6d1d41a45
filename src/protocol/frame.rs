//! Frame header encoding and decoding.
//!
//! Layout (16 bytes, then payload):
//! - 0: magic `A1`
//! - 1: sub-type `04` on commands; flag bits on replies
//! - 2..8: MAC address
//! - 8: content length (`payload + 7`, wrapped to 8 bits)
//! - 9: zero
//! - 10..12: package index (BE)
//! - 12: company code
//! - 13: device type
//! - 14..16: auth code (BE)

use super::error::{DecodeError, Result};
use super::types::{
    CONTENT_LENGTH_BASE, CONTENT_LENGTH_BIAS, FRAME_MAGIC, FRAME_SUB_TYPE, HEADER_SIZE, MacAddress,
};

/// Identity fields copied into the header of every command sent to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAddress {
    pub mac: MacAddress,
    pub company_code: u8,
    pub device_type: u8,
    pub auth_code: u16,
}

/// Decoded frame header plus the bytes that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolHeader {
    pub ack_required: bool,
    /// Bit 0 of byte 1; meaning unknown.
    pub reserved_flag: bool,
    pub wifi_locked: bool,
    pub mac: MacAddress,
    pub protocol_index: u16,
    pub company_code: u8,
    pub device_type: u8,
    pub auth_code: u16,
    /// Content length as declared by the sender.
    pub content_length: u8,
    pub payload: Vec<u8>,
}

impl ProtocolHeader {
    /// Address fields of the sending device.
    pub fn address(&self) -> DeviceAddress {
        DeviceAddress {
            mac: self.mac,
            company_code: self.company_code,
            device_type: self.device_type,
            auth_code: self.auth_code,
        }
    }
}

/// Build a command frame.
///
/// The caller owns `package_index` and must advance it after each frame.
pub fn encode_command(address: &DeviceAddress, package_index: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());

    frame.push(FRAME_MAGIC);
    frame.push(FRAME_SUB_TYPE);
    frame.extend_from_slice(&address.mac.octets());
    // Firmware wraps oversized lengths instead of rejecting them.
    frame.push(((payload.len() + CONTENT_LENGTH_BIAS) & 0xFF) as u8);
    frame.push(0);
    frame.extend_from_slice(&package_index.to_be_bytes());
    frame.push(address.company_code);
    frame.push(address.device_type);
    frame.extend_from_slice(&address.auth_code.to_be_bytes());
    frame.extend_from_slice(payload);

    frame
}

/// Parse a received frame header.
pub fn decode_header(bytes: &[u8]) -> Result<ProtocolHeader> {
    if bytes.len() < HEADER_SIZE {
        return Err(DecodeError::Truncated {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        });
    }

    if bytes[0] != FRAME_MAGIC {
        return Err(DecodeError::BadMagic(bytes[0]));
    }

    let content_length = bytes[8];
    if usize::from(content_length) > bytes.len() - CONTENT_LENGTH_BASE {
        return Err(DecodeError::Truncated {
            expected: usize::from(content_length) + CONTENT_LENGTH_BASE,
            actual: bytes.len(),
        });
    }

    let flags = bytes[1];
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&bytes[2..8]);

    Ok(ProtocolHeader {
        ack_required: flags & 0x02 != 0,
        reserved_flag: flags & 0x01 != 0,
        wifi_locked: flags & 0x04 != 0,
        mac: MacAddress(mac),
        protocol_index: u16::from_be_bytes([bytes[10], bytes[11]]),
        company_code: bytes[12],
        device_type: bytes[13],
        auth_code: u16::from_be_bytes([bytes[14], bytes[15]]),
        content_length,
        payload: bytes[HEADER_SIZE..].to_vec(),
    })
}
