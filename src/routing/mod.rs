//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! TargetConfig[] (file, watcher, embedding code)
//!     → target.rs (compile pattern, validate backend, build client)
//!     → table.rs (atomic swap, whole or nothing)
//!
//! Dispatch:
//!     snapshot → iterate in table order
//!     → matcher.rs (pattern vs IMEI)
//!     → matching Target (backend URL, headers, client)
//! ```
//!
//! # Design Decisions
//! - Targets are immutable values; changes replace the whole table
//! - Table order is delivery order
//! - One HTTP client per target so TLS verification is per backend

pub mod matcher;
pub mod table;
pub mod target;

pub use table::{RoutingTable, TableSnapshot};
pub use target::{compile_targets, ConfigError, Target, TargetConfig};
