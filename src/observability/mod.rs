//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! listener, connection, distributor produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (json, fmt or term)
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;

pub use logging::LogFormat;
