use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use super::{OutboxTransport, SendResult};
use crate::policy::{classify_status, HttpRetryClass};
use crate::{Entry, OutboxError, OutboxResult};

/// Configuration for the reference HTTP transport
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Endpoint receiving entry payloads as JSON POST bodies
    pub endpoint: String,

    /// Per-call timeout; a timeout is a transient failure
    pub timeout: Duration,
}

impl HttpTransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Reference HTTP transport: POSTs the entry payload as JSON.
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> OutboxResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OutboxError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

/// A usable dedup hint: non-empty, at most 256 chars
fn valid_idempotency_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= 256
}

/// Parse `Retry-After` as an integer number of seconds (fallback none)
fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl OutboxTransport for HttpTransport {
    async fn send(&self, entry: &Entry) -> SendResult {
        // .json() sets Content-Type: application/json
        let mut request = self.client.post(&self.config.endpoint).json(&entry.payload);

        if let Some(key) = entry.idempotency_key.as_deref() {
            if valid_idempotency_key(key) {
                request = request.header("Idempotency-Key", key);
            }
        }

        // Entry headers merge last and may override anything above
        if let Some(headers) = &entry.headers {
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                // Timeouts and socket errors are transient
                warn!(entry_id = %entry.id, "HTTP send failed: {}", err);
                return SendResult::transient(err.to_string());
            }
        };

        let status = response.status().as_u16();
        debug!(entry_id = %entry.id, status, "HTTP send completed");

        // 409: the server already processed this entry
        if status == 409 {
            return SendResult::ok();
        }

        match classify_status(status) {
            HttpRetryClass::Success => SendResult::ok(),
            HttpRetryClass::Permanent => SendResult::permanent(format!("HTTP {}", status)),
            HttpRetryClass::Transient => match parse_retry_after(&response) {
                Some(after) => SendResult::rate_limited(after, format!("HTTP {}", status)),
                None => SendResult::transient(format!("HTTP {}", status)),
            },
        }
    }
}
