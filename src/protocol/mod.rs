//! 352 air purifier LAN protocol (UDP port 11530).
//!
//! Every datagram is a 16-byte header followed by a payload. Commands carry a
//! device-class discriminator byte and a checksummed `A5 A0 ...` body; state
//! reports carry a fixed 33-byte telemetry payload.

mod command;
mod error;
mod frame;
mod telemetry;
mod types;


pub use command::{Command, QUERY_STATE_PAYLOAD, discriminator};
pub use error::{DecodeError, Result};
pub use frame::{DeviceAddress, ProtocolHeader, decode_header, encode_command};
pub use telemetry::{
    AirQuality, ChildLock, DeviceState, FilterType, LightState, OperatingMode, PowerCommand, SwitchState,
    TimerSetting, WindSpeed, decode_state,
};
pub use types::{FRAME_MAGIC, FRAME_SUB_TYPE, HEADER_SIZE, MacAddress, STATE_PAYLOAD_SIZE, UDP_PORT};
