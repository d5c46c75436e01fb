use poem::http::StatusCode;

use crate::{
    application::{handlers::ChannelStats, services::EnqueueInfo},
    domain::{
        errors::NotifyError,
        models::{Attachment, SendRequest, SendResponse},
    },
    presentation::http::{
        requests::SendNotificationRequestDto,
        responses::{ChannelStatsDto, EnqueueResponseDto, SendResponseDto},
    },
};

pub fn map_request(dto: SendNotificationRequestDto) -> SendRequest {
    SendRequest {
        message_id: dto.message_id.unwrap_or_default(),
        subject: dto.subject,
        content: dto.content,
        priority: dto.priority.into(),
        recipient_type: dto.recipient_type,
        recipient_addr: dto.recipient_addr,
        recipient_name: dto.recipient_name,
        work_order_id: dto.work_order_id,
        event_type: dto.event_type.into(),
        metadata: dto.metadata,
        templates: dto.templates,
        attachments: dto
            .attachments
            .into_iter()
            .map(|a| {
                Attachment::new(
                    a.name,
                    a.content_type
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                    a.data.0,
                )
            })
            .collect(),
    }
}

pub fn map_response(response: &SendResponse) -> SendResponseDto {
    SendResponseDto {
        success: response.success,
        message_id: response.message_id.clone(),
        external_id: response.external_id.clone(),
        status: response.status.into(),
        error_message: response.error_message.clone(),
        timestamp: response.timestamp.to_rfc3339(),
        provider_response: response.provider_response.clone(),
    }
}

pub fn map_enqueue(info: &EnqueueInfo) -> EnqueueResponseDto {
    EnqueueResponseDto {
        queue: info.queue.clone(),
        task_id: info.task_id.clone(),
        next_process_at: info.next_process_at.to_rfc3339(),
    }
}

pub fn map_stats(stats: &ChannelStats) -> ChannelStatsDto {
    ChannelStatsDto {
        name: stats.name.clone(),
        registered: stats.registered,
        enabled: stats.enabled,
        max_retries: stats.max_retries,
        retry_interval_secs: stats.retry_interval_secs,
        requests: stats.counters.requests,
        attempts: stats.counters.attempts,
        sent: stats.counters.sent,
        failed: stats.counters.failed,
        cancelled: stats.counters.cancelled,
        last_error: stats.counters.last_error.clone(),
        last_sent_at: stats.counters.last_sent_at.map(|at| at.to_rfc3339()),
    }
}

pub fn status_for(err: &NotifyError) -> StatusCode {
    match err {
        NotifyError::InvalidInput(_) | NotifyError::Serialization(_) => StatusCode::BAD_REQUEST,
        NotifyError::ChannelNotFound(_) => StatusCode::NOT_FOUND,
        NotifyError::ChannelDisabled(_) => StatusCode::CONFLICT,
        NotifyError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
        NotifyError::Provider { .. } => StatusCode::BAD_GATEWAY,
        NotifyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        NotifyError::Cancelled | NotifyError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub fn api_error(err: NotifyError) -> poem::Error {
    poem::Error::from_string(err.to_string(), status_for(&err))
}
