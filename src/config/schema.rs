//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Every
//! section has defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::distributor::DispatchPolicy;
use crate::observability::LogFormat;
use crate::routing::TargetConfig;

/// Root configuration for the receiver.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// DirectIP TCP listener.
    pub listener: ListenerConfig,

    /// Distributor worker pool and dispatch policy.
    pub distributor: DistributorConfig,

    /// HTTP liveness endpoint.
    pub health: HealthConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Initial routing table, in delivery order.
    pub targets: Vec<TargetConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:2022").
    pub bind_address: String,

    /// Expect a PROXY protocol header (v1 or v2) before each message.
    pub proxy_protocol: bool,

    /// Time allowed to read the PROXY header.
    pub proxy_header_timeout_secs: u64,

    /// Absolute per-connection deadline covering read, dispatch and reply.
    pub connection_deadline_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:2022".to_string(),
            proxy_protocol: false,
            proxy_header_timeout_secs: 10,
            connection_deadline_secs: 30,
        }
    }
}

/// Distributor configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DistributorConfig {
    /// Number of listener tasks picking up submitted messages.
    pub workers: usize,

    /// Maximum concurrent dispatches; 0 means unbounded.
    pub max_in_flight: usize,

    /// What to do when a matching target fails.
    pub policy: DispatchPolicy,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            max_in_flight: 0,
            policy: DispatchPolicy::default(),
        }
    }
}

/// Health endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,

    /// Bind address for the HTTP liveness endpoint.
    pub bind_address: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:2023".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter directive, e.g. "info" or "directip_mux=debug".
    pub log_level: String,

    pub log_format: LogFormat,

    /// Expose a Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.listener.bind_address, "127.0.0.1:2022");
        assert_eq!(config.distributor.workers, 5);
        assert_eq!(config.health.bind_address, "127.0.0.1:2023");
        assert!(config.targets.is_empty());
    }

    #[test]
    fn full_document() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "0.0.0.0:10800"
            proxy_protocol = true

            [distributor]
            workers = 2
            max_in_flight = 16
            policy = "all_targets"

            [observability]
            log_format = "term"

            [[targets]]
            id = "fleet-a"
            imei_pattern = "^300"
            backend = "https://a.example.com/sbd"
            skip_tls = true
            headers = { Authorization = "Bearer token" }

            [[targets]]
            imei_pattern = ".*"
            backend = "http://archive.internal/"
            "#,
        )
        .unwrap();

        assert!(config.listener.proxy_protocol);
        assert_eq!(config.listener.connection_deadline_secs, 30);
        assert_eq!(config.distributor.policy, DispatchPolicy::AllTargets);
        assert_eq!(config.distributor.max_in_flight, 16);
        assert_eq!(config.observability.log_format, LogFormat::Term);
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].headers["Authorization"], "Bearer token");
        assert!(config.targets[0].skip_tls);
        assert_eq!(config.targets[1].id, "");
    }
}
