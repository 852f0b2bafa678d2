//! DirectIP wire protocol.
//!
//! # Data Flow
//! ```text
//! TCP byte stream
//!     → codec.rs (header, exact-length region read)
//!     → elements.rs (typed Information Elements)
//!     → message.rs (Message, immutable after decode)
//!
//! Reply:
//!     ConfirmationStatus → codec.rs → 7 bytes on the socket
//! ```
//!
//! # Design Decisions
//! - Unknown element identifiers are preserved, never rejected
//! - A single malformed element fails the whole message
//! - Payload bytes are opaque and never interpreted

pub mod codec;
pub mod elements;
pub mod message;

pub use codec::{decode, encode_confirmation, parse, ProtocolError};
pub use elements::{ConfirmationStatus, Location, SessionHeader, SessionStatus};
pub use message::{Message, MessageHeader};
