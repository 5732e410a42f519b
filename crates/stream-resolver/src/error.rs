use std::time::Duration;

use thiserror::Error;

/// Failures of a stream or metadata resolution.
///
/// `Clone` because a single in-flight resolution broadcasts its outcome to
/// every joined waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Network or protocol failure talking to the extraction service.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },

    /// Content is unavailable or blocked upstream.
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("resolution timed out after {0:?}")]
    Timeout(Duration),

    /// The task owning the resolution stopped before publishing a result.
    #[error("resolution aborted: {0}")]
    Aborted(String),
}

impl ResolveError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    pub fn transport_status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction(message.into())
    }

    /// Transport failures and timeouts are worth one more attempt; extraction
    /// failures will fail again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout(_))
    }

    /// Short stable label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Extraction(_) => "extraction",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Aborted(_) => "aborted",
        }
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        // Strip the URL; signed stream URLs must not reach logs.
        let status = err.status().map(|s| s.as_u16());
        Self::Transport {
            message: err.without_url().to_string(),
            status,
        }
    }
}
