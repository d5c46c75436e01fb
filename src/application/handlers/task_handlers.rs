use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    application::{
        handlers::dispatch_manager::{DispatchManager, RetryPolicy},
        services::{EnqueueOptions, QueuedTask},
    },
    domain::{
        errors::{DispatchFailure, NotifyError},
        events::{
            BatchSendTaskPayload, RetryFailedTaskPayload, ScheduledSendTaskPayload,
            SendTaskPayload, TASK_BATCH_SEND, TASK_RETRY_FAILED, TASK_SCHEDULED_SEND, TASK_SEND,
        },
        models::SendRequest,
    },
};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task is not due until {0}")]
    NotYetDue(DateTime<Utc>),
    #[error("malformed task payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("delivery failed: {0}")]
    Delivery(#[source] NotifyError),
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),
}

impl TaskError {
    fn is_retryable(&self) -> bool {
        match self {
            TaskError::Delivery(err) => err.is_retryable() || matches!(err, NotifyError::Cancelled),
            _ => false,
        }
    }
}

/// What the queue should do with a task after one run.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed,
    /// Run again: the task carries the bumped attempt and its next process time.
    Retry(QueuedTask),
    /// Not due yet; redeliver at the given time without consuming an attempt.
    Deferred(DateTime<Utc>),
    Dropped(String),
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, cancel: &CancellationToken, task: &QueuedTask) -> Result<(), TaskError>;
}

/// Exponential queue-level backoff: `base * 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct QueueBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl QueueBackoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for QueueBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max: Duration::from_secs(600),
        }
    }
}

/// Dispatches queued tasks to their handler by task type.
pub struct TaskRouter {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    backoff: QueueBackoff,
}

impl TaskRouter {
    pub fn new(backoff: QueueBackoff) -> Self {
        Self {
            handlers: HashMap::new(),
            backoff,
        }
    }

    /// A router with the four notification task kinds registered.
    pub fn for_manager(manager: Arc<DispatchManager>, backoff: QueueBackoff) -> Self {
        Self::new(backoff)
            .register(TASK_SEND, SendTaskHandler::new(manager.clone()))
            .register(
                TASK_BATCH_SEND,
                BatchSendTaskHandler::new(manager.clone(), backoff.base),
            )
            .register(
                TASK_SCHEDULED_SEND,
                ScheduledSendTaskHandler::new(manager.clone()),
            )
            .register(TASK_RETRY_FAILED, RetryFailedTaskHandler::new(manager))
    }

    pub fn register(mut self, task_type: &str, handler: impl TaskHandler + 'static) -> Self {
        self.handlers.insert(task_type.to_string(), Arc::new(handler));
        self
    }

    pub async fn process(&self, cancel: &CancellationToken, task: &QueuedTask) -> TaskOutcome {
        let now = Utc::now();
        if !task.is_due(now) {
            return TaskOutcome::Deferred(task.process_at);
        }

        let result = match self.handlers.get(&task.task_type) {
            Some(handler) => handler.handle(cancel, task).await,
            None => Err(TaskError::UnknownTaskType(task.task_type.clone())),
        };

        match result {
            Ok(()) => {
                debug!(task_id = %task.id, task_type = %task.task_type, "task completed");
                TaskOutcome::Completed
            }
            Err(TaskError::NotYetDue(at)) => TaskOutcome::Deferred(at),
            Err(err) if err.is_retryable() && task.retries_left() => {
                let delay = self.backoff.delay(task.attempt);
                let mut next = task.clone();
                next.attempt += 1;
                next.process_at =
                    now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    attempt = next.attempt,
                    max_retry = task.max_retry,
                    ?delay,
                    error = %err,
                    "task failed, scheduling retry"
                );
                TaskOutcome::Retry(next)
            }
            Err(err) => {
                error!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    attempt = task.attempt,
                    error = %err,
                    "task dropped"
                );
                TaskOutcome::Dropped(err.to_string())
            }
        }
    }
}

fn decode<T: DeserializeOwned>(task: &QueuedTask) -> Result<T, TaskError> {
    Ok(serde_json::from_slice(&task.payload)?)
}

pub struct SendTaskHandler {
    manager: Arc<DispatchManager>,
}

impl SendTaskHandler {
    pub fn new(manager: Arc<DispatchManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl TaskHandler for SendTaskHandler {
    async fn handle(&self, cancel: &CancellationToken, task: &QueuedTask) -> Result<(), TaskError> {
        let payload: SendTaskPayload = decode(task)?;
        self.manager
            .send_notification_once(cancel, payload.request)
            .await
            .map(|_| ())
            .map_err(|failure| TaskError::Delivery(failure.error))
    }
}

/// Sends every item once. Failed items are re-enqueued as individual send
/// tasks so the successful ones are never sent twice.
pub struct BatchSendTaskHandler {
    manager: Arc<DispatchManager>,
    retry_delay: Duration,
}

impl BatchSendTaskHandler {
    pub fn new(manager: Arc<DispatchManager>, retry_delay: Duration) -> Self {
        Self {
            manager,
            retry_delay,
        }
    }

    /// Queue budget left for a failed item, or `None` when it must not be
    /// retried. A cancelled item never reached the channel, so its attempt is
    /// not counted.
    async fn remaining_budget(&self, request: &SendRequest, failure: &DispatchFailure) -> Option<u32> {
        let message_id = &failure.response.message_id;
        let cancelled = matches!(failure.error, NotifyError::Cancelled);
        if !cancelled && !failure.error.is_retryable() {
            debug!(%message_id, error = %failure.error, "batch item failed permanently");
            return None;
        }

        let budget = match self.manager.queue_retry_budget(request).await {
            Ok(budget) => budget,
            Err(err) => {
                warn!(%message_id, error = %err, "batch item not retried");
                return None;
            }
        };
        if cancelled {
            Some(budget)
        } else if budget == 0 {
            debug!(%message_id, "batch item has no retries left");
            None
        } else {
            Some(budget - 1)
        }
    }
}

#[async_trait]
impl TaskHandler for BatchSendTaskHandler {
    async fn handle(&self, cancel: &CancellationToken, task: &QueuedTask) -> Result<(), TaskError> {
        let payload: BatchSendTaskPayload = decode(task)?;
        let requests = payload.requests;
        let outcomes = self
            .manager
            .batch(cancel, requests.clone(), RetryPolicy::SingleAttempt)
            .await;

        let total = outcomes.len();
        let mut failed = 0usize;
        for (request, outcome) in requests.into_iter().zip(outcomes) {
            let Err(failure) = outcome else {
                continue;
            };
            failed += 1;

            let message_id = failure.response.message_id.clone();
            let Some(max_retry) = self.remaining_budget(&request, &failure).await else {
                continue;
            };

            let mut request = request;
            request.message_id = message_id.clone();
            let enqueued = match serde_json::to_vec(&SendTaskPayload {
                request,
                created_at: Utc::now(),
            }) {
                Ok(bytes) => {
                    self.manager
                        .enqueue(
                            TASK_SEND,
                            bytes,
                            EnqueueOptions {
                                process_in: self.retry_delay,
                                task_id: Some(message_id.clone()),
                                max_retry,
                            },
                        )
                        .await
                }
                Err(err) => Err(err.into()),
            };
            if let Err(err) = enqueued {
                error!(%message_id, error = %err, "failed to re-enqueue batch item");
            }
        }

        info!(
            task_id = %task.id,
            total,
            failed,
            "batch task processed"
        );
        Ok(())
    }
}

/// Sends once the scheduled time has passed. A recurring schedule enqueues
/// its next occurrence on the first run, before delivery is attempted.
pub struct ScheduledSendTaskHandler {
    manager: Arc<DispatchManager>,
}

impl ScheduledSendTaskHandler {
    pub fn new(manager: Arc<DispatchManager>) -> Self {
        Self { manager }
    }

    async fn schedule_next(&self, payload: &ScheduledSendTaskPayload) -> Result<(), NotifyError> {
        let Some(recurrence) = payload.recurrence else {
            return Ok(());
        };

        let now = Utc::now();
        let mut next_at = recurrence.next_after(payload.scheduled_at);
        while next_at <= now {
            next_at = recurrence.next_after(next_at);
        }

        let mut request = payload.request.clone();
        request.message_id = Uuid::new_v4().to_string();
        let max_retry = self.manager.queue_retry_budget(&request).await?;
        let task_id = request.message_id.clone();
        let bytes = serde_json::to_vec(&ScheduledSendTaskPayload {
            request,
            created_at: now,
            scheduled_at: next_at,
            recurrence: Some(recurrence),
        })?;

        self.manager
            .enqueue(
                TASK_SCHEDULED_SEND,
                bytes,
                EnqueueOptions {
                    process_in: (next_at - now).to_std().unwrap_or_default(),
                    task_id: Some(task_id),
                    max_retry,
                },
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for ScheduledSendTaskHandler {
    async fn handle(&self, cancel: &CancellationToken, task: &QueuedTask) -> Result<(), TaskError> {
        let payload: ScheduledSendTaskPayload = decode(task)?;
        if !payload.is_due(Utc::now()) {
            return Err(TaskError::NotYetDue(payload.scheduled_at));
        }

        if task.attempt == 0 {
            if let Err(err) = self.schedule_next(&payload).await {
                error!(task_id = %task.id, error = %err, "failed to schedule next occurrence");
            }
        }

        self.manager
            .send_notification_once(cancel, payload.request)
            .await
            .map(|_| ())
            .map_err(|failure| TaskError::Delivery(failure.error))
    }
}

/// Re-delivers a notification that previously failed. The new message keeps a
/// reference to the original id in its metadata.
pub struct RetryFailedTaskHandler {
    manager: Arc<DispatchManager>,
}

impl RetryFailedTaskHandler {
    pub fn new(manager: Arc<DispatchManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl TaskHandler for RetryFailedTaskHandler {
    async fn handle(&self, cancel: &CancellationToken, task: &QueuedTask) -> Result<(), TaskError> {
        let payload: RetryFailedTaskPayload = decode(task)?;
        info!(
            task_id = %task.id,
            original_message_id = %payload.original_message_id,
            last_error = payload.last_error.as_deref().unwrap_or(""),
            "retrying failed notification"
        );

        let mut request = payload.request;
        request.metadata.insert(
            "original_message_id".into(),
            Value::String(payload.original_message_id),
        );

        self.manager
            .send_notification_once(cancel, request)
            .await
            .map(|_| ())
            .map_err(|failure| TaskError::Delivery(failure.error))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::application::handlers::dispatch_manager::tests::{StubChannel, StubFactory};
    use crate::config::{NotificationConfig, StaticConfigSource};
    use crate::domain::events::Recurrence;
    use crate::domain::models::{ChannelKind, SendRequest};
    use crate::infrastructure::messaging::in_memory::InMemoryTaskQueue;

    struct Fixture {
        factory: Arc<StubFactory>,
        queue: Arc<InMemoryTaskQueue>,
        router: TaskRouter,
    }

    fn fixture(stubs: Vec<StubChannel>) -> Fixture {
        let factory = StubFactory::new(stubs);
        let queue = Arc::new(InMemoryTaskQueue::new());
        let source = Arc::new(StaticConfigSource::new(NotificationConfig::default()));
        let manager = Arc::new(
            DispatchManager::new(source, factory.clone())
                .unwrap()
                .with_queue(queue.clone()),
        );
        let router = TaskRouter::for_manager(
            manager,
            QueueBackoff {
                base: Duration::from_secs(10),
                max: Duration::from_secs(60),
            },
        );
        Fixture {
            factory,
            queue,
            router,
        }
    }

    fn email(subject: &str) -> SendRequest {
        SendRequest {
            message_id: format!("id-{subject}"),
            subject: subject.into(),
            recipient_addr: "ops@example.com".into(),
            ..Default::default()
        }
    }

    fn feishu(subject: &str) -> SendRequest {
        SendRequest {
            message_id: format!("id-{subject}"),
            subject: subject.into(),
            recipient_addr: "oc_abc123".into(),
            ..Default::default()
        }
    }

    fn task<T: serde::Serialize>(task_type: &str, payload: &T, max_retry: u32) -> QueuedTask {
        QueuedTask::new(
            task_type,
            serde_json::to_vec(payload).unwrap(),
            EnqueueOptions {
                max_retry,
                ..Default::default()
            },
        )
    }

    fn send_task(request: SendRequest, max_retry: u32) -> QueuedTask {
        task(
            TASK_SEND,
            &SendTaskPayload {
                request,
                created_at: Utc::now(),
            },
            max_retry,
        )
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let backoff = QueueBackoff {
            base: Duration::from_secs(30),
            max: Duration::from_secs(600),
        };
        assert_eq!(backoff.delay(0), Duration::from_secs(30));
        assert_eq!(backoff.delay(1), Duration::from_secs(60));
        assert_eq!(backoff.delay(3), Duration::from_secs(240));
        assert_eq!(backoff.delay(5), Duration::from_secs(600));
        assert_eq!(backoff.delay(40), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn send_task_completes_with_a_single_attempt() {
        let f = fixture(vec![StubChannel::new(ChannelKind::Email)]);
        let outcome = f
            .router
            .process(&CancellationToken::new(), &send_task(email("a"), 3))
            .await;
        assert!(matches!(outcome, TaskOutcome::Completed));
        assert_eq!(f.factory.stub(ChannelKind::Email).calls(), 1);
    }

    #[tokio::test]
    async fn failed_send_task_is_retried_with_backoff() {
        let mut stub = StubChannel::new(ChannelKind::Email);
        stub.fail_first = u32::MAX;
        let f = fixture(vec![stub]);

        let original = send_task(email("a"), 2);
        let outcome = f.router.process(&CancellationToken::new(), &original).await;
        let TaskOutcome::Retry(next) = outcome else {
            panic!("expected retry, got {outcome:?}");
        };
        assert_eq!(next.id, original.id);
        assert_eq!(next.attempt, 1);
        assert!(next.process_at >= Utc::now() + ChronoDuration::seconds(9));
        // The channel's own retry loop is bypassed on the queue path.
        assert_eq!(f.factory.stub(ChannelKind::Email).calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_send_task_is_dropped() {
        let mut stub = StubChannel::new(ChannelKind::Email);
        stub.fail_first = u32::MAX;
        let f = fixture(vec![stub]);

        let mut exhausted = send_task(email("a"), 2);
        exhausted.attempt = 2;
        let outcome = f.router.process(&CancellationToken::new(), &exhausted).await;
        assert!(matches!(outcome, TaskOutcome::Dropped(_)));
    }

    #[tokio::test]
    async fn unknown_and_malformed_tasks_are_dropped() {
        let f = fixture(vec![StubChannel::new(ChannelKind::Email)]);
        let cancel = CancellationToken::new();

        let unknown = QueuedTask::new("notification:fax", b"{}".to_vec(), EnqueueOptions::default());
        assert!(matches!(
            f.router.process(&cancel, &unknown).await,
            TaskOutcome::Dropped(_)
        ));

        let malformed = QueuedTask::new(
            TASK_SEND,
            b"not json".to_vec(),
            EnqueueOptions {
                max_retry: 5,
                ..Default::default()
            },
        );
        assert!(matches!(
            f.router.process(&cancel, &malformed).await,
            TaskOutcome::Dropped(_)
        ));
    }

    #[tokio::test]
    async fn scheduled_task_before_its_time_is_deferred() {
        let f = fixture(vec![StubChannel::new(ChannelKind::Email)]);
        let at = Utc::now() + ChronoDuration::hours(2);
        let scheduled = task(
            TASK_SCHEDULED_SEND,
            &ScheduledSendTaskPayload {
                request: email("later"),
                created_at: Utc::now(),
                scheduled_at: at,
                recurrence: None,
            },
            3,
        );

        let outcome = f.router.process(&CancellationToken::new(), &scheduled).await;
        assert!(matches!(outcome, TaskOutcome::Deferred(until) if until == at));
        assert_eq!(f.factory.stub(ChannelKind::Email).calls(), 0);
    }

    #[tokio::test]
    async fn recurring_schedule_enqueues_next_occurrence() {
        let f = fixture(vec![StubChannel::new(ChannelKind::Email)]);
        let at = Utc::now() - ChronoDuration::minutes(1);
        let scheduled = task(
            TASK_SCHEDULED_SEND,
            &ScheduledSendTaskPayload {
                request: email("daily"),
                created_at: Utc::now(),
                scheduled_at: at,
                recurrence: Some(Recurrence::Daily),
            },
            3,
        );

        let outcome = f.router.process(&CancellationToken::new(), &scheduled).await;
        assert!(matches!(outcome, TaskOutcome::Completed));
        assert_eq!(f.factory.stub(ChannelKind::Email).calls(), 1);

        let pending = f.queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_type, TASK_SCHEDULED_SEND);
        let next: ScheduledSendTaskPayload = serde_json::from_slice(&pending[0].payload).unwrap();
        assert_eq!(next.scheduled_at, at + ChronoDuration::days(1));
        assert_ne!(next.request.message_id, "id-daily");
        assert_eq!(next.recurrence, Some(Recurrence::Daily));
    }

    #[tokio::test]
    async fn batch_task_requeues_only_failed_items() {
        let mut broken = StubChannel::new(ChannelKind::Feishu);
        broken.fail_first = u32::MAX;
        let f = fixture(vec![StubChannel::new(ChannelKind::Email), broken]);

        let batch = task(
            TASK_BATCH_SEND,
            &BatchSendTaskPayload {
                requests: vec![email("one"), feishu("two"), email("three")],
                created_at: Utc::now(),
            },
            0,
        );

        let outcome = f.router.process(&CancellationToken::new(), &batch).await;
        assert!(matches!(outcome, TaskOutcome::Completed));
        assert_eq!(f.factory.stub(ChannelKind::Email).calls(), 2);

        let pending = f.queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_type, TASK_SEND);
        assert_eq!(pending[0].id, "id-two");
        assert_eq!(pending[0].max_retry, 2);
    }

    #[tokio::test]
    async fn batch_task_skips_items_that_cannot_be_retried() {
        let mut exhausted = StubChannel::new(ChannelKind::Feishu);
        exhausted.max_retries = 0;
        exhausted.fail_first = u32::MAX;
        let mut rejecting = StubChannel::new(ChannelKind::Email);
        rejecting.fail_first = u32::MAX;
        rejecting.error = NotifyError::InvalidInput("mailbox unavailable".into());
        let f = fixture(vec![exhausted, rejecting]);

        let batch = task(
            TASK_BATCH_SEND,
            &BatchSendTaskPayload {
                requests: vec![feishu("z"), email("bad")],
                created_at: Utc::now(),
            },
            0,
        );

        let outcome = f.router.process(&CancellationToken::new(), &batch).await;
        assert!(matches!(outcome, TaskOutcome::Completed));
        assert!(f.queue.pending().is_empty());
        assert_eq!(f.factory.stub(ChannelKind::Feishu).calls(), 1);
        assert_eq!(f.factory.stub(ChannelKind::Email).calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_batch_items_keep_their_full_budget() {
        let f = fixture(vec![StubChannel::new(ChannelKind::Email)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let batch = task(
            TASK_BATCH_SEND,
            &BatchSendTaskPayload {
                requests: vec![email("late")],
                created_at: Utc::now(),
            },
            0,
        );

        f.router.process(&cancel, &batch).await;
        let pending = f.queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "id-late");
        assert_eq!(pending[0].max_retry, 3);
    }

    #[tokio::test]
    async fn retry_failed_task_references_original_message() {
        let f = fixture(vec![StubChannel::new(ChannelKind::Email)]);
        let retry = task(
            TASK_RETRY_FAILED,
            &RetryFailedTaskPayload {
                request: email("again"),
                created_at: Utc::now(),
                original_message_id: "orig-1".into(),
                last_error: Some("smtp 421".into()),
            },
            1,
        );

        let outcome = f.router.process(&CancellationToken::new(), &retry).await;
        assert!(matches!(outcome, TaskOutcome::Completed));
        let seen = f.factory.stub(ChannelKind::Email).seen.lock().unwrap().clone();
        assert_eq!(seen[0].metadata["original_message_id"], "orig-1");
    }
}
