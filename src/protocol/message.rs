//! The decoded unit: one message per device connection.

use serde::{Deserialize, Serialize};

use crate::protocol::codec::{ProtocolError, MESSAGE_HEADER_LEN, PROTOCOL_REVISION};
use crate::protocol::elements::{
    Confirmation, ElementKind, Location, Payload, SessionHeader, UnknownElement,
    ELEMENT_HEADER_LEN,
};

/// Fixed three byte header in front of the element region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Informational only; not validated.
    pub protocol_revision: u8,
    /// Length of the element region that follows the header.
    pub message_length: u16,
}

/// A decoded DirectIP message.
///
/// Known elements land in their typed slot; unknown ones are kept in
/// arrival order. The JSON form of this struct is what backends receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub header: MessageHeader,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionHeader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<Confirmation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown: Vec<UnknownElement>,
}

impl Message {
    /// An empty message with the current protocol revision.
    pub fn new() -> Self {
        Self {
            header: MessageHeader {
                protocol_revision: PROTOCOL_REVISION,
                message_length: 0,
            },
            session: None,
            payload: None,
            location: None,
            confirmation: None,
            unknown: Vec::new(),
        }
    }

    pub fn with_session(mut self, session: SessionHeader) -> Self {
        self.session = Some(session);
        self.sync_length()
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(Payload(payload.into()));
        self.sync_length()
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self.sync_length()
    }

    pub fn with_unknown(mut self, kind: u8, data: impl Into<Vec<u8>>) -> Self {
        self.unknown.push(UnknownElement {
            kind,
            data: data.into(),
        });
        self.sync_length()
    }

    fn sync_length(mut self) -> Self {
        self.header.message_length = self.region_len().min(u16::MAX as usize) as u16;
        self
    }

    /// Device identifier used for routing; empty when no session element was sent.
    pub fn identifier(&self) -> String {
        self.session
            .as_ref()
            .map(SessionHeader::imei)
            .unwrap_or_default()
    }

    /// Bytes the element region occupies on the wire.
    pub fn region_len(&self) -> usize {
        let fixed = |present: bool, kind: ElementKind| {
            if present {
                ELEMENT_HEADER_LEN + kind.fixed_len().unwrap_or(0)
            } else {
                0
            }
        };
        fixed(self.session.is_some(), ElementKind::MoHeader)
            + self
                .payload
                .as_ref()
                .map_or(0, |p| ELEMENT_HEADER_LEN + p.0.len())
            + fixed(self.location.is_some(), ElementKind::MoLocation)
            + fixed(self.confirmation.is_some(), ElementKind::MoConfirmation)
            + self
                .unknown
                .iter()
                .map(|e| ELEMENT_HEADER_LEN + e.data.len())
                .sum::<usize>()
    }

    /// Serialize back to wire bytes.
    ///
    /// Known elements are written in identifier order, unknown elements after
    /// them in the order they were received. The header length is recomputed.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let region = self.region_len();
        let declared = u16::try_from(region).map_err(|_| ProtocolError::RegionTooLarge(region))?;

        let mut out = Vec::with_capacity(MESSAGE_HEADER_LEN + region);
        out.push(self.header.protocol_revision);
        out.extend_from_slice(&declared.to_be_bytes());

        if let Some(session) = &self.session {
            write_element_header(&mut out, ElementKind::MoHeader as u8, SessionHeader::LEN)?;
            session.write(&mut out);
        }
        if let Some(payload) = &self.payload {
            write_element_header(&mut out, ElementKind::MoPayload as u8, payload.0.len())?;
            out.extend_from_slice(&payload.0);
        }
        if let Some(location) = &self.location {
            write_element_header(&mut out, ElementKind::MoLocation as u8, Location::LEN)?;
            location.write(&mut out);
        }
        if let Some(confirmation) = &self.confirmation {
            write_element_header(
                &mut out,
                ElementKind::MoConfirmation as u8,
                Confirmation::LEN,
            )?;
            out.push(confirmation.status);
        }
        for element in &self.unknown {
            write_element_header(&mut out, element.kind, element.data.len())?;
            out.extend_from_slice(&element.data);
        }
        Ok(out)
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

fn write_element_header(out: &mut Vec<u8>, kind: u8, len: usize) -> Result<(), ProtocolError> {
    let len = u16::try_from(len).map_err(|_| ProtocolError::RegionTooLarge(len))?;
    out.push(kind);
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}
