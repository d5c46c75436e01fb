use thiserror::Error;

use super::models::SendResponse;

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("channel disabled: {0}")]
    ChannelDisabled(String),
    #[error("provider error: {message}")]
    Provider {
        message: String,
        body: Option<String>,
    },
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("cancelled")]
    Cancelled,
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("queue error: {0}")]
    Queue(String),
}

impl NotifyError {
    pub fn provider(message: impl Into<String>) -> Self {
        NotifyError::Provider {
            message: message.into(),
            body: None,
        }
    }

    pub fn provider_with_body(message: impl Into<String>, body: impl Into<String>) -> Self {
        NotifyError::Provider {
            message: message.into(),
            body: Some(body.into()),
        }
    }

    /// Whether another delivery attempt may succeed. Input, resolution and
    /// configuration errors fail fast.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotifyError::Provider { .. } | NotifyError::Timeout(_))
    }
}

impl From<serde_json::Error> for NotifyError {
    fn from(err: serde_json::Error) -> Self {
        NotifyError::Serialization(err.to_string())
    }
}

/// Terminal outcome of a dispatch that did not end in `sent`.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct DispatchFailure {
    pub response: SendResponse,
    #[source]
    pub error: NotifyError,
}

impl DispatchFailure {
    pub fn new(response: SendResponse, error: NotifyError) -> Self {
        Self { response, error }
    }
}
