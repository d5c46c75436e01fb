use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use poem::Result as PoemResult;
use poem_openapi::{ApiResponse, OpenApi, payload::Json};

use crate::{
    application::usecases::{RetryNotificationRequest, ScheduleNotificationRequest},
    domain::errors::NotifyError,
    presentation::http::{
        endpoints::root::{ApiState, EndpointsTags},
        mappers::{api_error, map_enqueue, map_request, map_response},
        requests::{
            AsyncBatchSendRequestDto, AsyncSendRequestDto, BatchSendRequestDto, RetryRequestDto,
            ScheduleRequestDto, SendNotificationRequestDto,
        },
        responses::{BatchSendResponseDto, EnqueueResponseDto, SendResponseDto},
    },
};

#[derive(ApiResponse)]
pub enum SendNotificationResponse {
    /// Delivered.
    #[oai(status = 200)]
    Sent(Json<SendResponseDto>),
    /// Malformed, unroutable or addressed to a disabled channel.
    #[oai(status = 422)]
    Rejected(Json<SendResponseDto>),
    /// Every attempt failed, or the send was cancelled.
    #[oai(status = 502)]
    Failed(Json<SendResponseDto>),
}

#[derive(Clone)]
pub struct NotificationsEndpoints {
    state: Arc<ApiState>,
}

impl NotificationsEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl NotificationsEndpoints {
    /// Sends synchronously, retrying per the channel's policy.
    #[oai(path = "/notifications", method = "post", tag = EndpointsTags::Notifications)]
    pub async fn send(&self, request: Json<SendNotificationRequestDto>) -> SendNotificationResponse {
        let cancel = self.state.shutdown.child_token();
        match self
            .state
            .manager
            .send_notification(&cancel, map_request(request.0))
            .await
        {
            Ok(response) => SendNotificationResponse::Sent(Json(map_response(&response))),
            Err(failure) => {
                let dto = Json(map_response(&failure.response));
                match failure.error {
                    NotifyError::InvalidInput(_)
                    | NotifyError::ChannelNotFound(_)
                    | NotifyError::ChannelDisabled(_) => SendNotificationResponse::Rejected(dto),
                    _ => SendNotificationResponse::Failed(dto),
                }
            }
        }
    }

    #[oai(
        path = "/notifications/async",
        method = "post",
        tag = EndpointsTags::Notifications,
    )]
    pub async fn send_async(
        &self,
        request: Json<AsyncSendRequestDto>,
    ) -> PoemResult<Json<EnqueueResponseDto>> {
        let AsyncSendRequestDto {
            notification,
            delay_secs,
        } = request.0;
        let info = self
            .state
            .manager
            .send_notification_async(map_request(notification), Duration::from_secs(delay_secs))
            .await
            .map_err(api_error)?;
        Ok(Json(map_enqueue(&info)))
    }

    /// Sends every notification concurrently; results follow request order.
    #[oai(
        path = "/notifications/batch",
        method = "post",
        tag = EndpointsTags::Notifications,
    )]
    pub async fn send_batch(&self, request: Json<BatchSendRequestDto>) -> Json<BatchSendResponseDto> {
        let cancel = self.state.shutdown.child_token();
        let requests = request.0.notifications.into_iter().map(map_request).collect();
        let responses = self
            .state
            .manager
            .batch_send_notification(&cancel, requests)
            .await;

        let successful = responses.iter().filter(|r| r.success).count() as u32;
        let total = responses.len() as u32;
        Json(BatchSendResponseDto {
            results: responses.iter().map(map_response).collect(),
            total,
            successful,
            failed: total - successful,
        })
    }

    #[oai(
        path = "/notifications/batch/async",
        method = "post",
        tag = EndpointsTags::Notifications,
    )]
    pub async fn send_batch_async(
        &self,
        request: Json<AsyncBatchSendRequestDto>,
    ) -> PoemResult<Json<EnqueueResponseDto>> {
        let AsyncBatchSendRequestDto {
            notifications,
            delay_secs,
        } = request.0;
        let info = self
            .state
            .manager
            .batch_send_notification_async(
                notifications.into_iter().map(map_request).collect(),
                Duration::from_secs(delay_secs),
            )
            .await
            .map_err(api_error)?;
        Ok(Json(map_enqueue(&info)))
    }

    #[oai(
        path = "/notifications/schedule",
        method = "post",
        tag = EndpointsTags::Notifications,
    )]
    pub async fn schedule(
        &self,
        request: Json<ScheduleRequestDto>,
    ) -> PoemResult<Json<EnqueueResponseDto>> {
        let ScheduleRequestDto {
            notification,
            scheduled_at,
            recurrence,
        } = request.0;
        let scheduled_at = DateTime::parse_from_rfc3339(&scheduled_at)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|err| {
                api_error(NotifyError::InvalidInput(format!("invalid scheduled_at: {err}")))
            })?;

        let info = self
            .state
            .schedule_usecase
            .execute(ScheduleNotificationRequest {
                request: map_request(notification),
                scheduled_at,
                recurrence: recurrence.map(Into::into),
            })
            .await
            .map_err(api_error)?;
        Ok(Json(map_enqueue(&info)))
    }

    /// Re-delivers a failed notification under a new message id.
    #[oai(
        path = "/notifications/retry",
        method = "post",
        tag = EndpointsTags::Notifications,
    )]
    pub async fn retry(&self, request: Json<RetryRequestDto>) -> PoemResult<Json<EnqueueResponseDto>> {
        let RetryRequestDto {
            notification,
            last_error,
            delay_secs,
        } = request.0;
        let info = self
            .state
            .retry_usecase
            .execute(RetryNotificationRequest {
                request: map_request(notification),
                last_error,
                delay: Duration::from_secs(delay_secs),
            })
            .await
            .map_err(api_error)?;
        Ok(Json(map_enqueue(&info)))
    }
}
