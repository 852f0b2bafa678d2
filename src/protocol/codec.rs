//! Decoding of inbound messages and encoding of confirmation replies.
//!
//! ```text
//! ┌──────────┬─────────────────┬────────────────────────────────────────┐
//! │ revision │ region length   │ elements: { iei │ length │ data }*     │
//! │ u8       │ u16 BE          │           u8    │ u16 BE │ length     │
//! └──────────┴─────────────────┴────────────────────────────────────────┘
//! ```

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::elements::{
    Confirmation, ConfirmationStatus, ElementKind, Location, Payload, SessionHeader,
    UnknownElement, ELEMENT_HEADER_LEN,
};
use crate::protocol::message::{Message, MessageHeader};

/// Protocol revision written on every reply.
pub const PROTOCOL_REVISION: u8 = 1;

/// Revision byte plus the 16-bit region length.
pub const MESSAGE_HEADER_LEN: usize = 3;

/// Total size of an encoded confirmation.
pub const CONFIRMATION_LEN: usize = MESSAGE_HEADER_LEN + ELEMENT_HEADER_LEN + Confirmation::LEN;

/// Malformed, truncated or oversized wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("stream ended before the message header was complete")]
    TruncatedHeader,

    #[error("stream ended after {read} of {declared} declared element bytes")]
    TruncatedRegion { declared: usize, read: usize },

    #[error("header declares {declared} element bytes but {actual} follow")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("element header truncated: {remaining} bytes left in region")]
    TruncatedElementHeader { remaining: usize },

    #[error("element 0x{kind:02x} declares {declared} bytes but only {remaining} remain")]
    ElementOverrun {
        kind: u8,
        declared: usize,
        remaining: usize,
    },

    #[error("element 0x{kind:02x} must be {expected} bytes, got {actual}")]
    InvalidElementLength {
        kind: u8,
        expected: usize,
        actual: usize,
    },

    #[error("element 0x{kind:02x} appears more than once")]
    DuplicateElement { kind: u8 },

    #[error("element region of {0} bytes does not fit the 16-bit length field")]
    RegionTooLarge(usize),

    #[error("connection deadline exceeded while reading message")]
    DeadlineExceeded,

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Read exactly one message from `reader`.
///
/// Reads the header, then exactly the declared number of element bytes; it
/// never reads until EOF. Any shortfall or malformed element fails the whole
/// decode.
pub async fn decode<R>(reader: &mut R) -> Result<Message, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; MESSAGE_HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::TruncatedHeader
        } else {
            ProtocolError::Io(e)
        }
    })?;

    let declared = u16::from_be_bytes([header[1], header[2]]);
    let mut region = Vec::with_capacity(declared as usize);
    reader
        .take(declared as u64)
        .read_to_end(&mut region)
        .await?;

    if region.len() < declared as usize {
        return Err(ProtocolError::TruncatedRegion {
            declared: declared as usize,
            read: region.len(),
        });
    }

    parse_region(
        MessageHeader {
            protocol_revision: header[0],
            message_length: declared,
        },
        &region,
    )
}

/// Parse a complete message held in memory.
pub fn parse(bytes: &[u8]) -> Result<Message, ProtocolError> {
    if bytes.len() < MESSAGE_HEADER_LEN {
        return Err(ProtocolError::TruncatedHeader);
    }
    let declared = u16::from_be_bytes([bytes[1], bytes[2]]);
    let region = &bytes[MESSAGE_HEADER_LEN..];
    if region.len() < declared as usize {
        return Err(ProtocolError::TruncatedRegion {
            declared: declared as usize,
            read: region.len(),
        });
    }
    if region.len() > declared as usize {
        return Err(ProtocolError::LengthMismatch {
            declared: declared as usize,
            actual: region.len(),
        });
    }
    parse_region(
        MessageHeader {
            protocol_revision: bytes[0],
            message_length: declared,
        },
        region,
    )
}

fn parse_region(header: MessageHeader, region: &[u8]) -> Result<Message, ProtocolError> {
    let mut message = Message {
        header,
        ..Message::new()
    };

    let mut rest = region;
    while !rest.is_empty() {
        if rest.len() < ELEMENT_HEADER_LEN {
            return Err(ProtocolError::TruncatedElementHeader {
                remaining: rest.len(),
            });
        }
        let kind = rest[0];
        let len = u16::from_be_bytes([rest[1], rest[2]]) as usize;
        rest = &rest[ELEMENT_HEADER_LEN..];
        if len > rest.len() {
            return Err(ProtocolError::ElementOverrun {
                kind,
                declared: len,
                remaining: rest.len(),
            });
        }
        let (data, tail) = rest.split_at(len);
        rest = tail;

        let Ok(known) = ElementKind::try_from(kind) else {
            message.unknown.push(UnknownElement {
                kind,
                data: data.to_vec(),
            });
            continue;
        };

        if let Some(expected) = known.fixed_len() {
            if expected != len {
                return Err(ProtocolError::InvalidElementLength {
                    kind,
                    expected,
                    actual: len,
                });
            }
        }

        let duplicate = match known {
            ElementKind::MoHeader => message.session.replace(SessionHeader::parse(data)).is_some(),
            ElementKind::MoPayload => message.payload.replace(Payload(data.to_vec())).is_some(),
            ElementKind::MoLocation => message.location.replace(Location::parse(data)).is_some(),
            ElementKind::MoConfirmation => message
                .confirmation
                .replace(Confirmation { status: data[0] })
                .is_some(),
        };
        if duplicate {
            return Err(ProtocolError::DuplicateElement { kind });
        }
    }

    Ok(message)
}

/// Build the reply sent to the device: one header and one confirmation element.
pub fn encode_confirmation(status: ConfirmationStatus) -> [u8; CONFIRMATION_LEN] {
    let region = (ELEMENT_HEADER_LEN + Confirmation::LEN) as u16;
    let [region_hi, region_lo] = region.to_be_bytes();
    let [len_hi, len_lo] = (Confirmation::LEN as u16).to_be_bytes();
    [
        PROTOCOL_REVISION,
        region_hi,
        region_lo,
        ElementKind::MoConfirmation as u8,
        len_hi,
        len_lo,
        status.as_byte(),
    ]
}
