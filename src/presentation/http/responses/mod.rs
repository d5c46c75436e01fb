use poem_openapi::Object;
use serde_json::Value;

use crate::presentation::models::SendStatusKind;

#[derive(Object)]
pub struct SendResponseDto {
    pub success: bool,
    pub message_id: String,
    pub external_id: Option<String>,
    pub status: SendStatusKind,
    pub error_message: Option<String>,
    pub timestamp: String,
    pub provider_response: Option<Value>,
}

#[derive(Object)]
pub struct BatchSendResponseDto {
    pub results: Vec<SendResponseDto>,
    pub total: u32,
    pub successful: u32,
    pub failed: u32,
}

#[derive(Object)]
pub struct EnqueueResponseDto {
    pub queue: String,
    pub task_id: String,
    pub next_process_at: String,
}

#[derive(Object)]
pub struct HealthDto {
    pub status: String,
    pub channels: Vec<String>,
    pub queue_attached: bool,
    pub shutting_down: bool,
}

#[derive(Object)]
pub struct ChannelListDto {
    pub channels: Vec<String>,
}

#[derive(Object)]
pub struct ChannelStatsDto {
    pub name: String,
    pub registered: bool,
    pub enabled: bool,
    pub max_retries: u32,
    pub retry_interval_secs: u64,
    pub requests: u64,
    pub attempts: u64,
    pub sent: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub last_error: Option<String>,
    pub last_sent_at: Option<String>,
}

#[derive(Object)]
pub struct ChannelActionDto {
    pub channel: String,
    pub success: bool,
    pub message: String,
}
