//! Probe module for service health checks.
//!
//! A probe never fails past this boundary: every outcome, including
//! timeouts and transport errors, resolves to a [`ProbeOutcome`].

mod http;

pub use http::*;

use crate::db::ServiceStatus;
use crate::registry::ServiceTarget;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Probe error types. These are measurements, not failures of the monitor.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: ServiceStatus,
    /// Milliseconds until the full response was read. `None` when no
    /// response arrived (timeout or transport failure).
    pub latency_ms: Option<i64>,
}

impl ProbeOutcome {
    pub fn offline() -> Self {
        Self {
            status: ServiceStatus::Offline,
            latency_ms: None,
        }
    }
}

/// Classify a received response code against the expected one.
pub fn classify(code: u16, expected: u16) -> ServiceStatus {
    if code == expected {
        ServiceStatus::Online
    } else if code >= 500 {
        ServiceStatus::Offline
    } else {
        ServiceStatus::Issues
    }
}

/// Map a probe result onto an outcome. Errors always become offline.
pub fn outcome_from(result: Result<(u16, i64), ProbeError>, expected: u16) -> ProbeOutcome {
    match result {
        Ok((code, latency_ms)) => ProbeOutcome {
            status: classify(code, expected),
            latency_ms: Some(latency_ms),
        },
        Err(_) => ProbeOutcome::offline(),
    }
}

/// Performs a single health check.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &ServiceTarget, timeout: Duration) -> ProbeOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_is_total() {
        for expected in [200u16, 204, 301, 401, 503] {
            for code in 100u16..600 {
                let status = classify(code, expected);
                if code == expected {
                    assert_eq!(status, ServiceStatus::Online);
                } else if code >= 500 {
                    assert_eq!(status, ServiceStatus::Offline);
                } else {
                    assert_eq!(status, ServiceStatus::Issues);
                }
            }
        }
    }

    #[test]
    fn test_expected_server_error_is_online() {
        assert_eq!(classify(503, 503), ServiceStatus::Online);
        assert_eq!(classify(500, 503), ServiceStatus::Offline);
    }

    #[test]
    fn test_errors_are_offline() {
        let timeout = outcome_from(Err(ProbeError::Timeout(Duration::from_secs(7))), 200);
        assert_eq!(timeout, ProbeOutcome::offline());

        let refused = outcome_from(Err(ProbeError::Network("connection refused".into())), 200);
        assert_eq!(refused.status, ServiceStatus::Offline);
        assert_eq!(refused.latency_ms, None);

        let ok = outcome_from(Ok((200, 12)), 200);
        assert_eq!(ok.status, ServiceStatus::Online);
        assert_eq!(ok.latency_ms, Some(12));
    }
}
