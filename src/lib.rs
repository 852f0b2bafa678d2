//! Iridium DirectIP SBD receiver with IMEI-based fan-out to HTTP backends.

// Core subsystems
pub mod distributor;
pub mod net;
pub mod protocol;
pub mod routing;

// Cross-cutting concerns
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod observability;

pub use config::ServiceConfig;
pub use distributor::Distributor;
pub use lifecycle::Shutdown;
pub use protocol::Message;
