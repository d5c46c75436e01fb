use std::collections::HashMap;

use poem_openapi::{Object, types::Base64};
use serde_json::Value;

use crate::presentation::models::{EventKind, PriorityKind, RecurrenceKind};

#[derive(Object, Debug, Clone)]
pub struct AttachmentDto {
    #[oai(validator(min_length = 1))]
    pub name: String,
    pub content_type: Option<String>,
    pub data: Base64<Vec<u8>>,
}

#[derive(Object, Debug, Clone)]
pub struct SendNotificationRequestDto {
    /// Generated when omitted.
    pub message_id: Option<String>,
    #[oai(default)]
    pub subject: String,
    #[oai(validator(max_length = 65536))]
    pub content: String,
    #[oai(default)]
    pub priority: PriorityKind,
    /// Channel hint such as `email` or `feishu`; inferred from the address when empty.
    #[oai(default)]
    pub recipient_type: String,
    #[oai(validator(min_length = 1))]
    pub recipient_addr: String,
    #[oai(default)]
    pub recipient_name: String,
    pub work_order_id: Option<i64>,
    #[oai(default)]
    pub event_type: EventKind,
    #[oai(default)]
    pub metadata: HashMap<String, Value>,
    #[oai(default)]
    pub templates: HashMap<String, String>,
    #[oai(default)]
    pub attachments: Vec<AttachmentDto>,
}

#[derive(Object, Debug)]
pub struct AsyncSendRequestDto {
    pub notification: SendNotificationRequestDto,
    #[oai(default)]
    pub delay_secs: u64,
}

#[derive(Object, Debug)]
pub struct BatchSendRequestDto {
    #[oai(validator(min_items = 1, max_items = 100))]
    pub notifications: Vec<SendNotificationRequestDto>,
}

#[derive(Object, Debug)]
pub struct AsyncBatchSendRequestDto {
    #[oai(validator(min_items = 1, max_items = 100))]
    pub notifications: Vec<SendNotificationRequestDto>,
    #[oai(default)]
    pub delay_secs: u64,
}

#[derive(Object, Debug)]
pub struct ScheduleRequestDto {
    pub notification: SendNotificationRequestDto,
    /// RFC 3339 timestamp.
    pub scheduled_at: String,
    pub recurrence: Option<RecurrenceKind>,
}

#[derive(Object, Debug)]
pub struct RetryRequestDto {
    /// The failed notification, including its original `message_id`.
    pub notification: SendNotificationRequestDto,
    pub last_error: Option<String>,
    #[oai(default)]
    pub delay_secs: u64,
}
