// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors that can occur while buffering, serializing or shipping log entries
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to serialize log entries: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to send bulk request: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected response from bulk endpoint ({status}): {body}")]
    UnexpectedResponse { status: u16, body: String },

    #[error("Flush failed: {0}")]
    FlushFailed(String),

    #[error("Publisher is no longer running")]
    PublisherClosed,

    #[error("A tokio runtime is required to start the sink")]
    RuntimeUnavailable,
}

impl SinkError {
    /// Whether this is the "flush failed" condition that terminal signals swallow.
    #[must_use]
    pub fn is_flush_failed(&self) -> bool {
        matches!(self, SinkError::FlushFailed(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SinkError::InvalidConfig("missing customer token".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: missing customer token"
        );

        let error = SinkError::UnexpectedResponse {
            status: 200,
            body: "<html>".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Unexpected response from bulk endpoint (200): <html>"
        );
    }

    #[test]
    fn test_is_flush_failed() {
        assert!(SinkError::FlushFailed("no progress".into()).is_flush_failed());
        assert!(!SinkError::PublisherClosed.is_flush_failed());
        assert!(!SinkError::InvalidConfig("x".into()).is_flush_failed());
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: SinkError = json_err.into();
        assert!(matches!(error, SinkError::Serialization(_)));
    }
}
