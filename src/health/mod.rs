//! Health endpoint subsystem.
//!
//! A plain HTTP liveness probe for load balancers and orchestrators. It
//! reports that the process is up; it does not probe routing targets.

pub mod server;

pub use server::HealthServer;
