use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    application::{
        handlers::DispatchManager,
        services::{EnqueueInfo, EnqueueOptions},
    },
    domain::{
        errors::NotifyError,
        events::{RetryFailedTaskPayload, TASK_RETRY_FAILED},
        models::SendRequest,
    },
};

pub struct RetryNotificationUseCase {
    manager: Arc<DispatchManager>,
}

pub struct RetryNotificationRequest {
    /// The request as originally sent; its `message_id` identifies the failed send.
    pub request: SendRequest,
    pub last_error: Option<String>,
    pub delay: Duration,
}

impl RetryNotificationUseCase {
    pub fn new(manager: Arc<DispatchManager>) -> Self {
        Self { manager }
    }

    /// Enqueues a new delivery under a fresh message id.
    pub async fn execute(&self, request: RetryNotificationRequest) -> Result<EnqueueInfo, NotifyError> {
        let original_message_id = request.request.message_id.trim().to_string();
        if original_message_id.is_empty() {
            return Err(NotifyError::InvalidInput(
                "retry requires the original message id".into(),
            ));
        }

        let mut send = request.request;
        send.message_id = Uuid::new_v4().to_string();
        let max_retry = self.manager.queue_retry_budget(&send).await?;
        let task_id = send.message_id.clone();

        let payload = serde_json::to_vec(&RetryFailedTaskPayload {
            request: send,
            created_at: Utc::now(),
            original_message_id,
            last_error: request.last_error,
        })?;

        self.manager
            .enqueue(
                TASK_RETRY_FAILED,
                payload,
                EnqueueOptions {
                    process_in: request.delay,
                    task_id: Some(task_id),
                    max_retry,
                },
            )
            .await
    }
}
