//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, fatal on accept error)
//!     → proxy_protocol.rs (optional PROXY header strip)
//!     → connection.rs (deadline, decode, dispatch, reply, close)
//!     → handler.rs (Handler contract, implemented by the distributor)
//!
//! Connection States:
//!     Reading → Dispatching → Replying → Closed
//! ```
//!
//! # Design Decisions
//! - One message per connection; devices redial for the next one
//! - Every connection gets an absolute deadline covering read and write
//! - The reply is written even when decoding or dispatch failed

pub mod connection;
pub mod handler;
pub mod listener;
pub mod proxy_protocol;

pub use connection::{Connection, ConnectionId, ConnectionState, ConnectionTracker};
pub use handler::{handler_fn, Handler, HandlerError, Logged};
pub use listener::{Listener, ListenerError};
