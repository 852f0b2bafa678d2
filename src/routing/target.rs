//! Routing targets: configuration records and their compiled form.

use std::collections::BTreeMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::routing::matcher::PatternMatcher;

/// Errors raised while compiling a candidate routing table.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot compile pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid backend url {backend:?}: {reason}")]
    InvalidBackend { backend: String, reason: String },

    #[error("invalid header {name:?} for target {id:?}")]
    InvalidHeader { id: String, name: String },

    #[error("cannot build http client for target {id:?}: {source}")]
    Client {
        id: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("distributor is closed")]
    Closed,
}

/// A routing rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TargetConfig {
    /// Opaque identifier used by collaborators to update or remove a target.
    #[serde(default)]
    pub id: String,

    /// Regular expression matched against the device IMEI.
    pub imei_pattern: String,

    /// Backend URL receiving the JSON message via POST.
    pub backend: String,

    /// Accept invalid TLS certificates from the backend.
    #[serde(default)]
    pub skip_tls: bool,

    /// Static headers added to every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl TargetConfig {
    pub fn new(id: impl Into<String>, imei_pattern: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            imei_pattern: imei_pattern.into(),
            backend: backend.into(),
            skip_tls: false,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A compiled, immutable routing rule with its own HTTP client.
#[derive(Debug, Clone)]
pub struct Target {
    config: TargetConfig,
    matcher: PatternMatcher,
    backend: Url,
    headers: HeaderMap,
    client: reqwest::Client,
}

impl Target {
    /// Compile the pattern, validate the backend and build the client.
    pub fn compile(config: TargetConfig) -> Result<Self, ConfigError> {
        let matcher =
            PatternMatcher::new(&config.imei_pattern).map_err(|source| ConfigError::InvalidPattern {
                pattern: config.imei_pattern.clone(),
                source,
            })?;

        let backend = parse_backend(&config.backend)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let invalid = || ConfigError::InvalidHeader {
                id: config.id.clone(),
                name: name.clone(),
            };
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            headers.append(name, value);
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.skip_tls)
            .no_proxy()
            .user_agent(concat!("directip-mux/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| ConfigError::Client {
                id: config.id.clone(),
                source,
            })?;

        Ok(Self {
            config,
            matcher,
            backend,
            headers,
            client,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    pub fn backend(&self) -> &Url {
        &self.backend
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn matches(&self, identifier: &str) -> bool {
        self.matcher.matches(identifier)
    }
}

/// Compile every candidate, stopping at the first error.
pub fn compile_targets(candidates: Vec<TargetConfig>) -> Result<Vec<Target>, ConfigError> {
    candidates.into_iter().map(Target::compile).collect()
}

pub(crate) fn parse_backend(backend: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidBackend {
        backend: backend.to_string(),
        reason,
    };
    let url = Url::parse(backend).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_valid_target() {
        let target = Target::compile(
            TargetConfig::new("a", "^300", "http://localhost:8080/sbd").with_header("X-Api-Key", "k"),
        )
        .unwrap();
        assert_eq!(target.id(), "a");
        assert!(target.matches("300434063500000"));
        assert_eq!(target.headers().get("x-api-key").unwrap(), "k");
        assert_eq!(target.backend().path(), "/sbd");
    }

    #[test]
    fn invalid_pattern_is_named() {
        let err = Target::compile(TargetConfig::new("a", "([", "http://localhost")).unwrap_err();
        match &err {
            ConfigError::InvalidPattern { pattern, .. } => assert_eq!(pattern, "(["),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("\"([\""));
    }

    #[test]
    fn rejects_non_http_backend() {
        let err = Target::compile(TargetConfig::new("a", ".*", "ftp://example.com")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBackend { .. }));
    }

    #[test]
    fn rejects_bad_header() {
        let err = Target::compile(
            TargetConfig::new("a", ".*", "http://localhost").with_header("bad header", "v"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeader { .. }));
    }

    #[test]
    fn compile_targets_stops_at_first_error() {
        let result = compile_targets(vec![
            TargetConfig::new("ok", "^300", "http://localhost"),
            TargetConfig::new("bad", "(", "http://localhost"),
        ]);
        assert!(matches!(result, Err(ConfigError::InvalidPattern { .. })));
    }
}
