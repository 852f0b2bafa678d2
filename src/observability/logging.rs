//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber
//! - Select the output format (JSON, plain, terminal)
//!
//! # Design Decisions
//! - JSON for production, `term` (ANSI colors) for development
//! - `RUST_LOG` overrides the configured level when set

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Fmt,
    Term,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "fmt" => Ok(Self::Fmt),
            "term" => Ok(Self::Term),
            other => Err(format!("unknown log format {other:?}, expected json, fmt or term")),
        }
    }
}

/// Install the global subscriber.
///
/// Fails if `level` is not a valid filter directive or a subscriber is
/// already installed.
pub fn init(level: &str, format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()?,
        LogFormat::Fmt => registry
            .with(tracing_subscriber::fmt::layer().with_ansi(false))
            .try_init()?,
        LogFormat::Term => registry
            .with(tracing_subscriber::fmt::layer().with_ansi(true))
            .try_init()?,
    }
    Ok(())
}
