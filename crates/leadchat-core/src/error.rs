//! Error taxonomy for the lead conversation core.

use thiserror::Error;

/// Failures from the text-completion service.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport-level failure (connect, DNS, TLS).
    #[error("completion request failed: {0}")]
    Request(String),
    /// The request did not complete within the bounded timeout.
    #[error("completion request timed out")]
    Timeout,
    /// Non-success HTTP status from the completion API.
    #[error("completion API error {status}: {body}")]
    Api { status: u16, body: String },
    /// Response body did not match the expected candidate shape.
    #[error("completion response malformed: {0}")]
    Malformed(String),
    /// The client was asked to run in live mode without a configured key/URL.
    #[error("completion client not configured: {0}")]
    NotConfigured(String),
}

impl LlmError {
    /// Whether the caller may retry this failure (timeouts, transport, 429/5xx).
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::Request(_) => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::Malformed(_) | LlmError::NotConfigured(_) => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Request(err.to_string())
        }
    }
}

/// Failures from a persistence backend or the fallback chain.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store error: {0}")]
    Sled(#[from] sled::Error),
    #[error("record encode/decode failed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("spreadsheet mirror error: {0}")]
    Mirror(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// Terminal failure: every tier of the fallback chain was attempted and failed.
    #[error("all persistence backends failed: {}", format_failures(.failures))]
    AllBackendsFailed { failures: Vec<(String, String)> },
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(backend, reason)| format!("{}: {}", backend, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::Request("connection reset".into()).is_retryable());
        assert!(LlmError::Api { status: 503, body: String::new() }.is_retryable());
        assert!(LlmError::Api { status: 429, body: String::new() }.is_retryable());
        assert!(!LlmError::Api { status: 400, body: String::new() }.is_retryable());
        assert!(!LlmError::Malformed("no candidates".into()).is_retryable());
    }

    #[test]
    fn aggregated_error_lists_every_backend() {
        let err = StoreError::AllBackendsFailed {
            failures: vec![
                ("sled".into(), "io error".into()),
                ("sheets".into(), "webhook status 500".into()),
                ("local".into(), "poisoned".into()),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("sled: io error"));
        assert!(msg.contains("sheets: webhook status 500"));
        assert!(msg.contains("local: poisoned"));
    }
}
