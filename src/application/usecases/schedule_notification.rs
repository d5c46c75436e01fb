use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    application::{
        handlers::{DispatchManager, dispatch_manager::assign_message_id},
        services::{EnqueueInfo, EnqueueOptions},
    },
    domain::{
        errors::NotifyError,
        events::{Recurrence, ScheduledSendTaskPayload, TASK_SCHEDULED_SEND},
        models::SendRequest,
    },
};

pub struct ScheduleNotificationUseCase {
    manager: Arc<DispatchManager>,
}

pub struct ScheduleNotificationRequest {
    pub request: SendRequest,
    pub scheduled_at: DateTime<Utc>,
    pub recurrence: Option<Recurrence>,
}

impl ScheduleNotificationUseCase {
    pub fn new(manager: Arc<DispatchManager>) -> Self {
        Self { manager }
    }

    /// Enqueues a send for `scheduled_at`. A time in the past is sent on the
    /// next worker pass.
    pub async fn execute(
        &self,
        request: ScheduleNotificationRequest,
    ) -> Result<EnqueueInfo, NotifyError> {
        let ScheduleNotificationRequest {
            request: mut send,
            scheduled_at,
            recurrence,
        } = request;

        assign_message_id(&mut send);
        let max_retry = self.manager.queue_retry_budget(&send).await?;
        let task_id = send.message_id.clone();
        let now = Utc::now();

        let payload = serde_json::to_vec(&ScheduledSendTaskPayload {
            request: send,
            created_at: now,
            scheduled_at,
            recurrence,
        })?;

        self.manager
            .enqueue(
                TASK_SCHEDULED_SEND,
                payload,
                EnqueueOptions {
                    process_in: (scheduled_at - now).to_std().unwrap_or_default(),
                    task_id: Some(task_id),
                    max_retry,
                },
            )
            .await
    }
}
