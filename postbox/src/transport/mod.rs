pub mod http;

use async_trait::async_trait;
use std::time::Duration;

use crate::Entry;

pub use http::{HttpTransport, HttpTransportConfig};

/// Outcome of one delivery attempt.
///
/// The core never inspects the payload; it only observes this shape.
#[derive(Debug, Clone, Default)]
pub struct SendResult {
    /// Entry was delivered (or the server already processed it)
    pub success: bool,

    /// Entry must not be retried
    pub permanently_failed: bool,

    /// Diagnostic error text
    pub error: Option<String>,

    /// Server-requested minimum wait before the next attempt
    pub retry_after: Option<Duration>,
}

impl SendResult {
    /// Successful delivery
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Terminal failure: the entry ends in `failed`
    pub fn permanent(error: impl Into<String>) -> Self {
        Self {
            permanently_failed: true,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Retryable failure
    pub fn transient(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Retryable failure with a server-provided backpressure hint
    pub fn rate_limited(retry_after: Duration, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            retry_after: Some(retry_after),
            ..Self::default()
        }
    }

    /// True when neither success nor permanent failure: retry per policy
    pub fn is_transient(&self) -> bool {
        !self.success && !self.permanently_failed
    }
}

/// Transport trait: maps an entry to a delivery outcome.
///
/// Implementations report failures through `SendResult` rather than
/// errors, so the scheduler has a single settle path.
#[async_trait]
pub trait OutboxTransport: Send + Sync {
    async fn send(&self, entry: &Entry) -> SendResult;
}
