//! Typed Information Elements of a mobile-originated DirectIP message.
//!
//! Every element on the wire is `{ iei: u8, length: u16 (BE), data }`.
//! Known identifiers are decoded into the records below; anything else is
//! kept as an [`UnknownElement`] so newer gateways never break decoding.

use base64::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Size of an element header (identifier + length).
pub const ELEMENT_HEADER_LEN: usize = 3;

/// Information Element Identifiers understood by this service.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// MO header: session and device identity.
    MoHeader = 0x01,
    /// MO payload: opaque application bytes.
    MoPayload = 0x02,
    /// MO location information.
    MoLocation = 0x03,
    /// MO confirmation (reply only).
    MoConfirmation = 0x05,
}

impl ElementKind {
    /// Exact data length for fixed-size kinds, `None` for variable ones.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            ElementKind::MoHeader => Some(SessionHeader::LEN),
            ElementKind::MoPayload => None,
            ElementKind::MoLocation => Some(Location::LEN),
            ElementKind::MoConfirmation => Some(Confirmation::LEN),
        }
    }
}

impl TryFrom<u8> for ElementKind {
    type Error = u8;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            0x01 => Ok(ElementKind::MoHeader),
            0x02 => Ok(ElementKind::MoPayload),
            0x03 => Ok(ElementKind::MoLocation),
            0x05 => Ok(ElementKind::MoConfirmation),
            other => Err(other),
        }
    }
}

/// Status reported by the gateway for the SBD session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Completed,
    CompletedLocationUnacceptable,
    Timeout,
    TooLarge,
    RfLinkLoss,
    ProtocolAnomaly,
    Prohibited,
    Other(u8),
}

impl From<u8> for SessionStatus {
    fn from(val: u8) -> Self {
        match val {
            0 => SessionStatus::Completed,
            1 => SessionStatus::CompletedLocationUnacceptable,
            10 => SessionStatus::Timeout,
            12 => SessionStatus::TooLarge,
            13 => SessionStatus::RfLinkLoss,
            14 => SessionStatus::ProtocolAnomaly,
            15 => SessionStatus::Prohibited,
            other => SessionStatus::Other(other),
        }
    }
}

impl From<SessionStatus> for u8 {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Completed => 0,
            SessionStatus::CompletedLocationUnacceptable => 1,
            SessionStatus::Timeout => 10,
            SessionStatus::TooLarge => 12,
            SessionStatus::RfLinkLoss => 13,
            SessionStatus::ProtocolAnomaly => 14,
            SessionStatus::Prohibited => 15,
            SessionStatus::Other(code) => code,
        }
    }
}

impl Serialize for SessionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8((*self).into())
    }
}

impl<'de> Deserialize<'de> for SessionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u8::deserialize(deserializer).map(SessionStatus::from)
    }
}

/// MO header element (IEI 0x01), carrying the device identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    /// Call detail record reference assigned by the gateway.
    pub cdr_reference: u32,
    /// 15 ASCII digits identifying the modem.
    #[serde(with = "imei_string")]
    pub imei: [u8; 15],
    pub session_status: SessionStatus,
    /// Mobile-originated message sequence number.
    pub momsn: u16,
    /// Mobile-terminated message sequence number.
    pub mtmsn: u16,
    /// Session time, seconds since the unix epoch.
    pub time_of_session: u32,
}

impl SessionHeader {
    pub const LEN: usize = 28;

    /// A completed session for `imei`, NUL-padded or truncated to 15 bytes.
    pub fn for_imei(imei: &str) -> Self {
        let mut bytes = [0u8; 15];
        let len = imei.len().min(bytes.len());
        bytes[..len].copy_from_slice(&imei.as_bytes()[..len]);
        Self {
            cdr_reference: 0,
            imei: bytes,
            session_status: SessionStatus::Completed,
            momsn: 0,
            mtmsn: 0,
            time_of_session: 0,
        }
    }

    /// The IMEI as text, with trailing NUL padding removed.
    pub fn imei(&self) -> String {
        String::from_utf8_lossy(&self.imei)
            .trim_end_matches('\0')
            .to_string()
    }

    pub(crate) fn parse(data: &[u8]) -> Self {
        let mut r = Fields::new(data);
        let cdr_reference = r.u32();
        let mut imei = [0u8; 15];
        imei.copy_from_slice(r.take(15));
        Self {
            cdr_reference,
            imei,
            session_status: SessionStatus::from(r.u8()),
            momsn: r.u16(),
            mtmsn: r.u16(),
            time_of_session: r.u32(),
        }
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.cdr_reference.to_be_bytes());
        out.extend_from_slice(&self.imei);
        out.push(self.session_status.into());
        out.extend_from_slice(&self.momsn.to_be_bytes());
        out.extend_from_slice(&self.mtmsn.to_be_bytes());
        out.extend_from_slice(&self.time_of_session.to_be_bytes());
    }
}

/// MO payload element (IEI 0x02). Never interpreted by this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(#[serde(with = "base64_bytes")] pub Vec<u8>);

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// MO location element (IEI 0x03).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Raw flag byte: bit 1 set = southern hemisphere, bit 0 set = western.
    pub flags: u8,
    pub latitude_degrees: u8,
    /// Thousandths of a minute.
    pub latitude_minutes: u16,
    pub longitude_degrees: u8,
    /// Thousandths of a minute.
    pub longitude_minutes: u16,
    /// Circular error probable, in kilometres.
    pub cep_radius: u32,
}

impl Location {
    pub const LEN: usize = 11;

    const SOUTH: u8 = 0b10;
    const WEST: u8 = 0b01;

    /// Latitude in signed decimal degrees.
    pub fn latitude(&self) -> f64 {
        let value = self.latitude_degrees as f64 + self.latitude_minutes as f64 / 60_000.0;
        if self.flags & Self::SOUTH != 0 {
            -value
        } else {
            value
        }
    }

    /// Longitude in signed decimal degrees.
    pub fn longitude(&self) -> f64 {
        let value = self.longitude_degrees as f64 + self.longitude_minutes as f64 / 60_000.0;
        if self.flags & Self::WEST != 0 {
            -value
        } else {
            value
        }
    }

    pub(crate) fn parse(data: &[u8]) -> Self {
        let mut r = Fields::new(data);
        Self {
            flags: r.u8(),
            latitude_degrees: r.u8(),
            latitude_minutes: r.u16(),
            longitude_degrees: r.u8(),
            longitude_minutes: r.u16(),
            cep_radius: r.u32(),
        }
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.push(self.flags);
        out.push(self.latitude_degrees);
        out.extend_from_slice(&self.latitude_minutes.to_be_bytes());
        out.push(self.longitude_degrees);
        out.extend_from_slice(&self.longitude_minutes.to_be_bytes());
        out.extend_from_slice(&self.cep_radius.to_be_bytes());
    }
}

/// Confirmation status byte sent back to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Rejected,
    Accepted,
}

impl ConfirmationStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            ConfirmationStatus::Rejected => 0,
            ConfirmationStatus::Accepted => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfirmationStatus::Rejected => "rejected",
            ConfirmationStatus::Accepted => "accepted",
        }
    }
}

/// MO confirmation element (IEI 0x05).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub status: u8,
}

impl Confirmation {
    pub const LEN: usize = 1;

    pub fn is_accepted(&self) -> bool {
        self.status != 0
    }
}

/// An element with an identifier this service does not understand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownElement {
    pub kind: u8,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Sequential big-endian reader over an element whose length was already checked.
struct Fields<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> &'a [u8] {
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        slice
    }

    fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    fn u16(&mut self) -> u16 {
        let b = self.take(2);
        u16::from_be_bytes([b[0], b[1]])
    }

    fn u32(&mut self) -> u32 {
        let b = self.take(4);
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64_STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod imei_string {
    use super::*;

    pub fn serialize<S: Serializer>(imei: &[u8; 15], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(String::from_utf8_lossy(imei).trim_end_matches('\0'))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 15], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = text.as_bytes();
        if bytes.len() > 15 {
            return Err(serde::de::Error::custom(format!(
                "imei {text:?} is longer than 15 bytes"
            )));
        }
        let mut imei = [0u8; 15];
        imei[..bytes.len()].copy_from_slice(bytes);
        Ok(imei)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_kind_from_byte() {
        assert_eq!(ElementKind::try_from(0x01), Ok(ElementKind::MoHeader));
        assert_eq!(ElementKind::try_from(0x05), Ok(ElementKind::MoConfirmation));
        assert_eq!(ElementKind::try_from(0x41), Err(0x41));
    }

    #[test]
    fn session_status_codes() {
        assert_eq!(SessionStatus::from(13), SessionStatus::RfLinkLoss);
        assert_eq!(SessionStatus::from(7), SessionStatus::Other(7));
        assert_eq!(u8::from(SessionStatus::Prohibited), 15);
    }

    #[test]
    fn location_hemispheres() {
        let loc = Location {
            flags: 0b11,
            latitude_degrees: 47,
            latitude_minutes: 30_000,
            longitude_degrees: 8,
            longitude_minutes: 15_000,
            cep_radius: 2,
        };
        assert!((loc.latitude() + 47.5).abs() < 1e-9);
        assert!((loc.longitude() + 8.25).abs() < 1e-9);
    }

    #[test]
    fn imei_serializes_as_text() {
        let header = SessionHeader {
            cdr_reference: 1,
            imei: *b"300434063500000",
            session_status: SessionStatus::Completed,
            momsn: 2,
            mtmsn: 0,
            time_of_session: 0,
        };
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["imei"], "300434063500000");
        assert_eq!(json["session_status"], 0);
    }

    #[test]
    fn payload_serializes_as_base64() {
        let json = serde_json::to_string(&Payload(vec![0xde, 0xad, 0xbe, 0xef])).unwrap();
        assert_eq!(json, "\"3q2+7w==\"");
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_bytes(), &[0xde, 0xad, 0xbe, 0xef]);
    }
}
