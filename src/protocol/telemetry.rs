//! Device state telemetry (33-byte payload).

use std::net::IpAddr;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;

use super::error::{DecodeError, Result};
use super::types::{STATE_PAYLOAD_SIZE, STATE_SIGNATURE};

/// Operating mode (low nibble of byte 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, TryFromPrimitive, IntoPrimitive)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum OperatingMode {
    Auto = 1,
    Sleep = 2,
    Fast = 3,
    Custom = 4,
    Reserved = 5,
}

/// Installed filter (high nibble of byte 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, TryFromPrimitive, IntoPrimitive)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum FilterType {
    Unknown = 0,
    Filter = 1,
    Reserved = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum WindSpeed {
    #[strum(to_string = "1")]
    One = 1,
    #[strum(to_string = "2")]
    Two = 2,
    #[strum(to_string = "3")]
    Three = 3,
    #[strum(to_string = "4")]
    Four = 4,
    #[strum(to_string = "5")]
    Five = 5,
    #[strum(to_string = "6")]
    Six = 6,
}

impl WindSpeed {
    pub const COUNT: u8 = 6;

    /// Speed level as a percentage of the top speed (16, 33, 50, 66, 83, 100).
    pub fn percentage(self) -> u8 {
        let level = u16::from(u8::from(self));
        (level * 100 / u16::from(Self::COUNT)) as u8
    }

    /// Nearest speed at or above `percent`; zero and below map to the lowest speed.
    pub fn from_percentage(percent: u8) -> Self {
        let percent = u16::from(percent.min(100));
        let level = (percent * u16::from(Self::COUNT)).div_ceil(100).max(1);
        Self::try_from(level as u8).unwrap_or(WindSpeed::One)
    }
}

/// Shutdown timer, in hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum TimerSetting {
    #[strum(to_string = "off")]
    Off = 0,
    #[strum(to_string = "1h")]
    OneHour = 1,
    #[strum(to_string = "2h")]
    TwoHours = 2,
    #[strum(to_string = "3h")]
    ThreeHours = 3,
    #[strum(to_string = "5h")]
    FiveHours = 5,
    #[strum(to_string = "8h")]
    EightHours = 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, TryFromPrimitive, IntoPrimitive)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum AirQuality {
    Good = 1,
    Normal = 2,
    Bad = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, TryFromPrimitive, IntoPrimitive)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum ChildLock {
    Unlocked = 0,
    Locked = 17,
}

/// Indicator light state. Also the raw value sent by the light command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, TryFromPrimitive, IntoPrimitive)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum LightState {
    On = 0,
    Off = 17,
}

/// Reported power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, TryFromPrimitive, IntoPrimitive)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum SwitchState {
    On = 0,
    Off = 17,
}

/// Raw value sent by the power command. Differs from [`SwitchState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, TryFromPrimitive, IntoPrimitive)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum PowerCommand {
    On = 53,
    Off = 17,
}

/// Decoded device state report.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    /// Address the report was received from.
    pub source_ip: IpAddr,
    pub mode: OperatingMode,
    pub filter_type: FilterType,
    pub wind_speed: WindSpeed,
    pub timer: TimerSetting,
    pub air_quality: AirQuality,
    pub child_lock: ChildLock,
    pub light: LightState,
    pub switch: SwitchState,
    pub last_timer: TimerSetting,
    /// PM2.5 concentration (µg/m³).
    pub pm25: u16,
    pub total_online_time: u16,
    pub air_total_value: u32,
    pub total_purification_value: u32,
    pub linkage: u8,
}

impl DeviceState {
    pub fn is_on(&self) -> bool {
        self.switch == SwitchState::On
    }

    pub fn is_light_on(&self) -> bool {
        self.light == LightState::On
    }
}

/// Online-time readings in these ranges are sensor noise.
fn filter_online_time(raw: u16) -> u16 {
    if raw > 65059 || (raw > 10000 && raw < 65000) {
        0
    } else {
        raw
    }
}

/// 3-byte cumulative counter: multiplier index followed by a BE base value.
fn scaled_counter(bytes: &[u8]) -> u32 {
    let multiplier = match bytes[0] {
        1 => 10,
        2 => 100,
        3 => 1000,
        _ => 1,
    };
    u32::from(u16::from_be_bytes([bytes[1], bytes[2]])) * multiplier
}

fn enum_field<E>(field: &'static str, raw: u8) -> Result<E>
where
    E: TryFromPrimitive<Primitive = u8>,
{
    E::try_from_primitive(raw).map_err(|_| DecodeError::UnknownEnumValue {
        field,
        value: u16::from(raw),
    })
}

/// Decode a telemetry payload.
///
/// Returns `Ok(None)` when the payload is not a state report (wrong length or
/// signature). Returns an error when it is one but carries an unknown value.
pub fn decode_state(payload: &[u8], source_ip: IpAddr) -> Result<Option<DeviceState>> {
    if payload.len() != STATE_PAYLOAD_SIZE || payload[1..3] != STATE_SIGNATURE {
        return Ok(None);
    }

    let last_timer_raw = u16::from_be_bytes([payload[10], payload[11]]);
    let last_timer = u8::try_from(last_timer_raw)
        .ok()
        .and_then(|raw| TimerSetting::try_from(raw).ok())
        .ok_or(DecodeError::UnknownEnumValue {
            field: "last timer",
            value: last_timer_raw,
        })?;

    Ok(Some(DeviceState {
        source_ip,
        mode: enum_field("mode", payload[3] & 0x0F)?,
        filter_type: enum_field("filter type", payload[3] >> 4)?,
        wind_speed: enum_field("wind speed", payload[4])?,
        timer: enum_field("timer", payload[5])?,
        air_quality: enum_field("air quality", payload[6])?,
        child_lock: enum_field("child lock", payload[7])?,
        light: enum_field("light", payload[8])?,
        switch: enum_field("switch", payload[9])?,
        last_timer,
        pm25: u16::from_be_bytes([payload[12], payload[13]]),
        total_online_time: filter_online_time(u16::from_be_bytes([payload[19], payload[20]])),
        air_total_value: scaled_counter(&payload[21..24]),
        total_purification_value: scaled_counter(&payload[24..27]),
        linkage: payload[27],
    }))
}
