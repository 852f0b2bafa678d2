//! Delivery of one message to every matching target.
//!
//! # Responsibilities
//! - Walk a table snapshot in order and pick the targets whose pattern
//!   matches the IMEI
//! - POST the JSON message to each, with static headers and a request id
//! - Apply the failure policy and report a single result
//!
//! # Design Decisions
//! - The message is serialized once and the bytes reused for every target
//! - The response body is always read to the end so connections are reused
//! - No retries: the device redials when the confirmation is negative

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::observability::metrics;
use crate::protocol::Message;
use crate::routing::Target;

/// Header carrying the per-message correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// What to do when a matching target fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Stop at the first failing target; later targets are not contacted.
    #[default]
    FirstFailure,
    /// Contact every matching target and fail if any of them failed.
    AllTargets,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("cannot serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("cannot call webhook {backend}: {source}")]
    Transport {
        backend: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("webhook {backend} answered {status}")]
    Status {
        backend: String,
        status: StatusCode,
        body: String,
    },

    #[error("{} matching targets failed{}", .0.len(), first_failure(.0))]
    Aggregate(Vec<DispatchError>),

    #[error("dispatch ended without a result")]
    Lost,
}

fn first_failure(errors: &[DispatchError]) -> String {
    errors
        .first()
        .map(|e| format!(", first: {e}"))
        .unwrap_or_default()
}

/// Stateless delivery engine shared by all dispatch units.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    policy: DispatchPolicy,
    gate: Option<Arc<Semaphore>>,
}

impl Dispatcher {
    /// `max_in_flight == 0` leaves concurrency unbounded.
    pub fn new(policy: DispatchPolicy, max_in_flight: usize) -> Self {
        Self {
            policy,
            gate: (max_in_flight > 0).then(|| Arc::new(Semaphore::new(max_in_flight))),
        }
    }

    /// Deliver `message` to every target in `targets` whose pattern matches.
    ///
    /// No match is a success.
    pub async fn dispatch(&self, message: &Message, targets: &[Target]) -> Result<(), DispatchError> {
        let _permit = match &self.gate {
            Some(gate) => gate.acquire().await.ok(),
            None => None,
        };

        let identifier = message.identifier();
        let matched: Vec<&Target> = targets.iter().filter(|t| t.matches(&identifier)).collect();
        if matched.is_empty() {
            debug!(imei = %identifier, "No target matches");
            return Ok(());
        }

        let body = serde_json::to_vec(message)?;
        let request_id = Uuid::new_v4().to_string();

        let mut failures = Vec::new();
        for target in matched {
            if let Err(e) = deliver(target, &body, &request_id).await {
                if self.policy == DispatchPolicy::FirstFailure {
                    return Err(e);
                }
                failures.push(e);
            }
        }

        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => Err(DispatchError::Aggregate(failures)),
        }
    }
}

async fn deliver(target: &Target, body: &[u8], request_id: &str) -> Result<(), DispatchError> {
    let backend = target.backend().as_str();
    let start = Instant::now();

    let mut request = target
        .client()
        .post(target.backend().clone())
        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .headers(target.headers().clone())
        .body(body.to_vec());
    if let Ok(value) = HeaderValue::from_str(request_id) {
        request = request.header(REQUEST_ID_HEADER, value);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(source) => {
            error!(backend, error = %source, "Cannot call webhook");
            metrics::record_dispatch(backend, "error", start);
            return Err(DispatchError::Transport {
                backend: backend.to_string(),
                source,
            });
        }
    };

    let status = response.status();
    let content = response.text().await.unwrap_or_default();
    metrics::record_dispatch(backend, status.as_str(), start);

    if status.is_success() {
        info!(backend, status = status.as_u16(), content = %content, "Data transmitted");
        Ok(())
    } else {
        error!(backend, status = status.as_u16(), content = %content, "Data not transmitted");
        Err(DispatchError::Status {
            backend: backend.to_string(),
            status,
            body: content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SessionHeader;
    use crate::routing::{compile_targets, TargetConfig};

    fn message(imei: &str) -> Message {
        Message::new()
            .with_session(SessionHeader::for_imei(imei))
            .with_payload(b"hi".to_vec())
    }

    #[tokio::test]
    async fn no_match_is_success() {
        // Nothing listens on port 9; a request would fail.
        let targets = compile_targets(vec![TargetConfig::new("a", "^300", "http://127.0.0.1:9/")]).unwrap();
        let dispatcher = Dispatcher::new(DispatchPolicy::FirstFailure, 0);

        dispatcher.dispatch(&message("999000000000000"), &targets).await.unwrap();
    }

    #[tokio::test]
    async fn transport_failure_names_backend() {
        let targets = compile_targets(vec![TargetConfig::new("a", "^300", "http://127.0.0.1:9/")]).unwrap();
        let dispatcher = Dispatcher::new(DispatchPolicy::FirstFailure, 0);

        let err = dispatcher
            .dispatch(&message("300000000000000"), &targets)
            .await
            .unwrap_err();
        match err {
            DispatchError::Transport { backend, .. } => assert_eq!(backend, "http://127.0.0.1:9/"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn all_targets_aggregates_failures() {
        let targets = compile_targets(vec![
            TargetConfig::new("a", ".*", "http://127.0.0.1:9/a"),
            TargetConfig::new("b", ".*", "http://127.0.0.1:9/b"),
        ])
        .unwrap();
        let dispatcher = Dispatcher::new(DispatchPolicy::AllTargets, 1);

        let err = dispatcher
            .dispatch(&message("300000000000000"), &targets)
            .await
            .unwrap_err();
        match err {
            DispatchError::Aggregate(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn aggregate_display_names_first_failure() {
        let empty = DispatchError::Aggregate(Vec::new());
        assert_eq!(empty.to_string(), "0 matching targets failed");

        let two = DispatchError::Aggregate(vec![DispatchError::Lost, DispatchError::Lost]);
        assert_eq!(
            two.to_string(),
            "2 matching targets failed, first: dispatch ended without a result"
        );
    }

    #[test]
    fn policy_names() {
        assert_eq!(serde_json::to_string(&DispatchPolicy::AllTargets).unwrap(), "\"all_targets\"");
        assert_eq!(DispatchPolicy::default(), DispatchPolicy::FirstFailure);
    }
}
