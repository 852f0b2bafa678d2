//! Distributor subsystem.
//!
//! # Data Flow
//! ```text
//! Distributor::handle(message)
//!     → intake channel (rendezvous)
//!     → one of N listener tasks picks it up, snapshots the table
//!     → dispatch task (dispatch.rs)
//!         → matching targets in table order
//!         → POST JSON, 2xx = success
//!     → result back to the caller
//!
//! Distributor::set_targets(configs)
//!     → compile every pattern (whole or nothing)
//!     → update channel → a listener task swaps the table
//! ```
//!
//! # Design Decisions
//! - Dispatches never wait for each other; only pickup is serialized
//! - Table changes apply to messages picked up after the swap
//! - First failure stops delivery unless the policy says otherwise

pub mod dispatch;
pub mod service;

pub use dispatch::{DispatchError, DispatchPolicy, Dispatcher, REQUEST_ID_HEADER};
pub use service::Distributor;
