//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, target compilation)
//!     → ServiceConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Distributor::set_targets (whole-table swap)
//! ```
//!
//! # Design Decisions
//! - Only the routing table is hot-reloaded; listener and pool settings need a restart
//! - All fields have defaults to allow minimal configs
//! - An invalid reload is logged and ignored, the active table stays

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, LoadError};
pub use schema::{DistributorConfig, HealthConfig, ListenerConfig, ObservabilityConfig, ServiceConfig};
pub use validation::{validate_config, ValidationError};
pub use watcher::{apply_target_updates, ConfigWatcher};
