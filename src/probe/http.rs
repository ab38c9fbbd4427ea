//! HTTP probe implementation.

use super::{outcome_from, ProbeError, ProbeOutcome, Prober};
use crate::registry::ServiceTarget;

use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Prober issuing one GET per check with a shared connection pool.
#[derive(Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("statuswatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;
        Ok(Self { client })
    }

    /// Run an HTTP probe against the given address.
    ///
    /// Returns the response code and latency in milliseconds.
    pub async fn run_http_probe(&self, address: &str, timeout: Duration) -> Result<(u16, i64), ProbeError> {
        let url = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        let start = Instant::now();

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let code = response.status().as_u16();

        // Read the full body to measure complete transfer time
        let _body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        Ok((code, elapsed.as_millis() as i64))
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(timeout)
    } else {
        ProbeError::Network(e.to_string())
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &ServiceTarget, timeout: Duration) -> ProbeOutcome {
        // Add jitter to avoid thundering herd
        let jitter = rand::random::<u64>() % 100;
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let result = self.run_http_probe(&target.url, timeout).await;
        if let Err(e) = &result {
            tracing::debug!("Probe failed for {}: {}", target.name, e);
        }

        outcome_from(result, target.expected_response_code)
    }
}
