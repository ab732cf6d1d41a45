//! Device identity and the per-device control surface.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::protocol::{
    Command, DeviceAddress, DeviceState, LightState, MacAddress, OperatingMode, PowerCommand, WindSpeed,
    decode_header, decode_state,
};
use crate::transport::{Link, Transport};

/// Device record as returned by the cloud device list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    #[serde(deserialize_with = "code_string")]
    pub auth_code: String,
    pub mac_address: String,
    #[serde(default)]
    pub device_name: String,
    #[serde(deserialize_with = "code_string")]
    pub device_type: String,
    #[serde(deserialize_with = "code_string")]
    pub company_code: String,
}

/// Codes normally arrive as hex strings; accept bare numbers too.
fn code_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Text(String),
        Number(u64),
    }

    Ok(match Code::deserialize(deserializer)? {
        Code::Text(s) => s,
        Code::Number(n) => n.to_string(),
    })
}

/// Immutable identity of one purifier, obtained from the cloud at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: String,
    pub address: DeviceAddress,
}

impl DeviceIdentity {
    pub fn mac(&self) -> MacAddress {
        self.address.mac
    }
}

impl TryFrom<DeviceRecord> for DeviceIdentity {
    type Error = AppError;

    fn try_from(record: DeviceRecord) -> Result<Self> {
        let hex_field = |name: &str, value: &str, digits: usize| -> Result<u16> {
            let value = value.trim();
            if value.is_empty() || value.len() > digits {
                return Err(AppError::invalid_device(format!("{name} '{value}' is not {digits} hex digits")));
            }
            u16::from_str_radix(value, 16)
                .map_err(|e| AppError::invalid_device(format!("{name} '{value}' is not hex: {e}")))
        };

        let mac: MacAddress = record.mac_address.parse().map_err(AppError::InvalidDevice)?;
        let company_code = hex_field("companyCode", &record.company_code, 2)? as u8;
        let device_type = hex_field("deviceType", &record.device_type, 2)? as u8;
        let auth_code = hex_field("authCode", &record.auth_code, 4)?;

        Ok(Self {
            name: record.device_name,
            address: DeviceAddress {
                mac,
                company_code,
                device_type,
                auth_code,
            },
        })
    }
}

/// Decode a datagram as a state reply. Anything else is logged and dropped.
pub(crate) fn accept_state_reply(datagram: &[u8], from: SocketAddr) -> Option<DeviceState> {
    let header = match decode_header(datagram) {
        Ok(header) => header,
        Err(e) => {
            debug!("Dropping datagram from {from}: {e}");
            return None;
        }
    };

    match decode_state(&header.payload, from.ip()) {
        Ok(Some(state)) => {
            debug!("State report from {} ({from}): {state:?}", header.mac);
            Some(state)
        }
        Ok(None) => {
            debug!("Datagram from {} ({from}) is not a state report", header.mac);
            None
        }
        Err(e) => {
            warn!("Malformed state report from {} ({from}): {e}", header.mac);
            None
        }
    }
}

/// A purifier reachable over the LAN broadcast protocol.
pub struct AirPurifier<T> {
    identity: DeviceIdentity,
    link: Link<T>,
    state: watch::Sender<Option<DeviceState>>,
}

impl<T: Transport> AirPurifier<T> {
    pub fn new(identity: DeviceIdentity, transport: T) -> Self {
        Self::with_link(identity, Link::new(transport))
    }

    pub fn with_link(identity: DeviceIdentity, link: Link<T>) -> Self {
        let (state, _) = watch::channel(None);
        Self { identity, link, state }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn mac(&self) -> MacAddress {
        self.identity.mac()
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Last state reported by the device, if any.
    pub fn state(&self) -> Option<DeviceState> {
        self.state.borrow().clone()
    }

    /// Receive every state replacement.
    pub fn subscribe(&self) -> watch::Receiver<Option<DeviceState>> {
        self.state.subscribe()
    }

    /// Replace the stored state wholesale.
    pub(crate) fn store_state(&self, state: DeviceState) {
        self.state.send_replace(Some(state));
    }

    /// Broadcast a control command without waiting for a reply.
    pub async fn send(&self, command: Command) -> Result<()> {
        let mut link = self.link.acquire().await;
        let frame = link.assemble(&self.identity.address, command);
        info!("Sending {command:?} to {} ({})", self.identity.name, self.mac());
        link.send_only(&frame).await
    }

    /// Broadcast a state query and wait up to `wait` for the first decodable report.
    ///
    /// Replies carry no request ID, so a report from another device that lands
    /// in the listen window is accepted too.
    pub async fn query_state(&self, wait: Duration) -> Result<Option<DeviceState>> {
        let reply = {
            let mut link = self.link.acquire().await;
            let frame = link.assemble(&self.identity.address, Command::QueryState);
            link.send_and_await(&frame, wait, accept_state_reply).await?
        };

        if let Some(state) = &reply {
            self.store_state(state.clone());
        }
        Ok(reply)
    }

    pub async fn turn_on(&self) -> Result<()> {
        self.send(Command::Power(PowerCommand::On)).await
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.send(Command::Power(PowerCommand::Off)).await
    }

    /// Invert the known power state; turns on when no state is known yet.
    pub async fn toggle_power(&self) -> Result<()> {
        let command = Command::toggle_power(self.state().as_ref());
        self.send(command).await
    }

    pub async fn turn_light_on(&self) -> Result<()> {
        self.send(Command::Light(LightState::On)).await
    }

    pub async fn turn_light_off(&self) -> Result<()> {
        self.send(Command::Light(LightState::Off)).await
    }

    /// Invert the known light state; turns on when no state is known yet.
    pub async fn toggle_light(&self) -> Result<()> {
        let command = Command::toggle_light(self.state().as_ref());
        self.send(command).await
    }

    pub async fn set_wind_speed(&self, speed: WindSpeed) -> Result<()> {
        self.send(Command::WindSpeed(speed)).await
    }

    pub async fn set_mode(&self, mode: OperatingMode) -> Result<()> {
        self.send(Command::Mode(mode)).await
    }
}

impl<T> std::fmt::Debug for AirPurifier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AirPurifier")
            .field("identity", &self.identity)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::{HEADER_SIZE, STATE_PAYLOAD_SIZE, SwitchState, encode_command};
    use crate::sign::with_checksum;
    use crate::transport::stub::{Exchange, StubTransport};

    pub(crate) fn test_identity() -> DeviceIdentity {
        DeviceIdentity {
            name: "Bedroom".to_string(),
            address: DeviceAddress {
                mac: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
                company_code: 0x01,
                device_type: 0x02,
                auth_code: 0x0003,
            },
        }
    }

    /// A state report frame as the device would broadcast it.
    pub(crate) fn state_frame(switch: SwitchState, pm25: u16) -> Vec<u8> {
        let mut payload = vec![0u8; STATE_PAYLOAD_SIZE];
        payload[1] = 0x5A;
        payload[2] = 0xA1;
        payload[3] = 0x01;
        payload[4] = 2;
        payload[6] = 1;
        payload[9] = u8::from(switch);
        payload[12..14].copy_from_slice(&pm25.to_be_bytes());
        encode_command(&test_identity().address, 0, &payload)
    }

    #[test]
    fn test_identity_from_record() {
        let record: DeviceRecord = serde_json::from_str(
            r#"{"authCode":"0003","macAddress":"AA:BB:CC:DD:EE:FF","deviceName":"Bedroom","deviceType":"02","companyCode":"01"}"#,
        )
        .unwrap();

        assert_eq!(DeviceIdentity::try_from(record).unwrap(), test_identity());
    }

    #[test]
    fn test_identity_from_record_numeric_codes() {
        let record: DeviceRecord = serde_json::from_str(
            r#"{"authCode":1234,"macAddress":"aabbccddeeff","deviceName":"X","deviceType":1,"companyCode":"F1"}"#,
        )
        .unwrap();

        let identity = DeviceIdentity::try_from(record).unwrap();
        assert_eq!(identity.address.auth_code, 0x1234);
        assert_eq!(identity.address.device_type, 1);
        assert_eq!(identity.address.company_code, 0xF1);
    }

    #[test]
    fn test_identity_from_bad_record() {
        let record = DeviceRecord {
            auth_code: "0003".to_string(),
            mac_address: "AA:BB".to_string(),
            device_name: String::new(),
            device_type: "02".to_string(),
            company_code: "01".to_string(),
        };
        assert!(matches!(DeviceIdentity::try_from(record), Err(AppError::InvalidDevice(_))));

        let record = DeviceRecord {
            auth_code: "00003".to_string(),
            mac_address: "AA:BB:CC:DD:EE:FF".to_string(),
            device_name: String::new(),
            device_type: "02".to_string(),
            company_code: "01".to_string(),
        };
        assert!(matches!(DeviceIdentity::try_from(record), Err(AppError::InvalidDevice(_))));
    }

    #[test]
    fn test_accept_state_reply_filters_garbage() {
        let from = crate::transport::stub::DEVICE_ADDR;
        assert!(accept_state_reply(&[0x00; 8], from).is_none());
        assert!(accept_state_reply(&encode_command(&test_identity().address, 0, &[1, 2]), from).is_none());

        let state = accept_state_reply(&state_frame(SwitchState::On, 12), from).unwrap();
        assert_eq!(state.pm25, 12);
        assert_eq!(state.source_ip, from.ip());
    }

    #[tokio::test]
    async fn test_set_wind_speed_sends_checksummed_frame() {
        let stub = StubTransport::new();
        let device = AirPurifier::new(test_identity(), stub.clone());

        device.set_wind_speed(WindSpeed::Three).await.unwrap();

        let sent = stub.sent_only();
        assert_eq!(sent.len(), 1);
        let frame = &sent[0];
        assert!(frame.ends_with(&with_checksum(&[0xA5, 0xA0, 0x52, 0x03, 0x00])));
        assert_eq!(frame[HEADER_SIZE], 0x01);
        assert_eq!(decode_header(frame).unwrap().address(), test_identity().address);
    }

    #[tokio::test]
    async fn test_commands_advance_package_index() {
        let stub = StubTransport::always(Exchange::Silence);
        let device = AirPurifier::new(test_identity(), stub.clone());

        device.turn_on().await.unwrap();
        device.set_mode(OperatingMode::Sleep).await.unwrap();
        device.query_state(Duration::from_millis(1)).await.unwrap();

        let indices: Vec<u16> = stub
            .sent_only()
            .iter()
            .chain(stub.exchanges().iter())
            .map(|frame| decode_header(frame).unwrap().protocol_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_query_state_stores_reply() {
        let stub = StubTransport::new();
        stub.push(Exchange::Reply(vec![
            b"garbage".to_vec(),
            state_frame(SwitchState::On, 35),
        ]));
        let device = AirPurifier::new(test_identity(), stub.clone());
        let mut updates = device.subscribe();

        let state = device.query_state(Duration::from_secs(5)).await.unwrap().unwrap();

        assert_eq!(state.pm25, 35);
        assert_eq!(device.state(), Some(state));
        assert!(updates.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_toggle_power_uses_known_state() {
        let stub = StubTransport::new();
        stub.push(Exchange::Reply(vec![state_frame(SwitchState::On, 0)]));
        let device = AirPurifier::new(test_identity(), stub.clone());

        device.toggle_power().await.unwrap();
        device.query_state(Duration::from_secs(5)).await.unwrap();
        device.toggle_power().await.unwrap();

        let sent = stub.sent_only();
        assert_eq!(sent[0][HEADER_SIZE + 4], u8::from(PowerCommand::On));
        assert_eq!(sent[1][HEADER_SIZE + 4], u8::from(PowerCommand::Off));
    }

    #[tokio::test]
    async fn test_toggle_light_without_state_turns_on() {
        let stub = StubTransport::new();
        let device = AirPurifier::new(test_identity(), stub.clone());

        device.toggle_light().await.unwrap();

        let sent = stub.sent_only();
        assert_eq!(sent[0][HEADER_SIZE + 3], 0x56);
        assert_eq!(sent[0][HEADER_SIZE + 4], u8::from(LightState::On));
    }
}
