use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Sent,
    Failed,
    Cancelled,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Sent => "sent",
            SendStatus::Failed => "failed",
            SendStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    pub message_id: String,
    /// Identifier assigned by the provider, when it returns one.
    pub external_id: Option<String>,
    pub status: SendStatus,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub provider_response: Option<Value>,
}

impl SendResponse {
    pub fn sent(message_id: impl Into<String>, external_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id: message_id.into(),
            external_id,
            status: SendStatus::Sent,
            error_message: None,
            timestamp: Utc::now(),
            provider_response: None,
        }
    }

    pub fn failed(message_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: message_id.into(),
            external_id: None,
            status: SendStatus::Failed,
            error_message: Some(error.into()),
            timestamp: Utc::now(),
            provider_response: None,
        }
    }

    pub fn cancelled(message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: message_id.into(),
            external_id: None,
            status: SendStatus::Cancelled,
            error_message: Some(reason.into()),
            timestamp: Utc::now(),
            provider_response: None,
        }
    }

    pub fn with_provider_response(mut self, payload: Value) -> Self {
        self.provider_response = Some(payload);
        self
    }
}
