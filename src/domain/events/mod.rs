use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::SendRequest;

pub const TASK_SEND: &str = "notification:send";
pub const TASK_BATCH_SEND: &str = "notification:batch_send";
pub const TASK_SCHEDULED_SEND: &str = "notification:scheduled_send";
pub const TASK_RETRY_FAILED: &str = "notification:retry_failed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendTaskPayload {
    pub request: SendRequest,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSendTaskPayload {
    pub requests: Vec<SendRequest>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Hourly,
    Daily,
    Weekly,
}

impl Recurrence {
    pub fn next_after(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Recurrence::Hourly => at + Duration::hours(1),
            Recurrence::Daily => at + Duration::days(1),
            Recurrence::Weekly => at + Duration::weeks(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledSendTaskPayload {
    pub request: SendRequest,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
}

impl ScheduledSendTaskPayload {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.scheduled_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryFailedTaskPayload {
    pub request: SendRequest,
    pub created_at: DateTime<Utc>,
    pub original_message_id: String,
    #[serde(default)]
    pub last_error: Option<String>,
}
