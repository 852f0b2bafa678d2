//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check addresses parse and counts are in range
//! - Check every target compiles (pattern, backend URL, headers)
//! - Check non-empty target ids are unique
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ServiceConfig;
use crate::routing::{ConfigError, Target};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    Address { field: &'static str, value: String },

    #[error("{field}: must be greater than zero")]
    Zero { field: &'static str },

    #[error("targets[{index}]: duplicate id {id:?}")]
    DuplicateId { index: usize, id: String },

    #[error("targets[{index}]: {source}")]
    Target {
        index: usize,
        #[source]
        source: ConfigError,
    },
}

/// Validate `config`, collecting every problem found.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let addresses = [
        ("listener.bind_address", &config.listener.bind_address, true),
        ("health.bind_address", &config.health.bind_address, config.health.enabled),
        (
            "observability.metrics_address",
            &config.observability.metrics_address,
            config.observability.metrics_enabled,
        ),
    ];
    for (field, value, required) in addresses {
        if required && value.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::Address {
                field,
                value: value.clone(),
            });
        }
    }

    if config.distributor.workers == 0 {
        errors.push(ValidationError::Zero {
            field: "distributor.workers",
        });
    }
    if config.listener.connection_deadline_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.connection_deadline_secs",
        });
    }
    if config.listener.proxy_protocol && config.listener.proxy_header_timeout_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.proxy_header_timeout_secs",
        });
    }

    let mut seen = HashSet::new();
    for (index, target) in config.targets.iter().enumerate() {
        if !target.id.is_empty() && !seen.insert(target.id.as_str()) {
            errors.push(ValidationError::DuplicateId {
                index,
                id: target.id.clone(),
            });
        }
        if let Err(source) = Target::compile(target.clone()) {
            errors.push(ValidationError::Target { index, source });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::TargetConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ServiceConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ServiceConfig::default();
        config.listener.bind_address = "not an address".into();
        config.distributor.workers = 0;
        config.targets = vec![
            TargetConfig::new("ok", "^300", "http://localhost"),
            TargetConfig::new("bad", "(", "http://localhost"),
        ];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::Target { index: 1, .. })));
    }

    #[test]
    fn duplicate_ids_are_reported() {
        let mut config = ServiceConfig::default();
        config.targets = vec![
            TargetConfig::new("a", "^300", "http://localhost"),
            TargetConfig::new("", "^301", "http://localhost"),
            TargetConfig::new("", "^302", "http://localhost"),
            TargetConfig::new("a", "^303", "http://localhost"),
        ];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ValidationError::DuplicateId { index: 3, id } if id == "a"));
    }

    #[test]
    fn disabled_endpoints_are_not_checked() {
        let mut config = ServiceConfig::default();
        config.health.enabled = false;
        config.health.bind_address = String::new();
        assert!(validate_config(&config).is_ok());
    }
}
