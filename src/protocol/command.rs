//! Command payloads.

use super::telemetry::{DeviceState, LightState, OperatingMode, PowerCommand, WindSpeed};
use crate::sign::with_checksum;

/// State query body. Sent without a checksum.
pub const QUERY_STATE_PAYLOAD: [u8; 6] = [0xA5, 0xA0, 0x11, 0x11, 0x00, 0x00];

const COMMAND_PREFIX: [u8; 2] = [0xA5, 0xA0];

const OP_MODE: u8 = 0x51;
const OP_WIND_SPEED: u8 = 0x52;
const OP_LIGHT: u8 = 0x56;
const OP_POWER: u8 = 0x5E;

/// A request the device understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    QueryState,
    Power(PowerCommand),
    Light(LightState),
    WindSpeed(WindSpeed),
    Mode(OperatingMode),
}

impl Command {
    /// Power command that inverts the known state, or turns on when nothing is known.
    pub fn toggle_power(current: Option<&DeviceState>) -> Self {
        match current {
            Some(state) if state.is_on() => Command::Power(PowerCommand::Off),
            _ => Command::Power(PowerCommand::On),
        }
    }

    /// Light command that inverts the known state, or turns on when nothing is known.
    pub fn toggle_light(current: Option<&DeviceState>) -> Self {
        match current {
            Some(state) if state.is_light_on() => Command::Light(LightState::Off),
            _ => Command::Light(LightState::On),
        }
    }

    /// Protocol body, checksummed where the protocol requires it.
    pub fn body(&self) -> Vec<u8> {
        let (op, value) = match *self {
            Command::QueryState => return QUERY_STATE_PAYLOAD.to_vec(),
            Command::Power(on_off) => (OP_POWER, u8::from(on_off)),
            Command::Light(state) => (OP_LIGHT, u8::from(state)),
            Command::WindSpeed(speed) => (OP_WIND_SPEED, u8::from(speed)),
            Command::Mode(mode) => (OP_MODE, u8::from(mode)),
        };
        with_checksum(&[COMMAND_PREFIX[0], COMMAND_PREFIX[1], op, value, 0x00])
    }

    /// Full frame payload: discriminator byte followed by the body.
    pub fn payload(&self, device_type: u8) -> Vec<u8> {
        let body = self.body();
        let mut payload = Vec::with_capacity(body.len() + 1);
        payload.push(discriminator(device_type));
        payload.extend_from_slice(&body);
        payload
    }
}

/// Routing byte that selects the device sub-controller.
pub fn discriminator(device_type: u8) -> u8 {
    match device_type {
        1 => 3,
        2..=4 => 1,
        _ => 0,
    }
}
