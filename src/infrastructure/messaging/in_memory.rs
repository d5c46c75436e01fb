use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::{
    handlers::{TaskOutcome, TaskRouter},
    services::{EnqueueInfo, EnqueueOptions, QueuedTask, TaskQueue},
};

const QUEUE_NAME: &str = "in-memory";

/// Process-local task queue, used when no NATS server is configured.
#[derive(Default)]
pub struct InMemoryTaskQueue {
    tasks: Mutex<Vec<QueuedTask>>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Vec<QueuedTask> {
        self.lock().clone()
    }

    /// Removes and returns every task due at `now`, earliest first.
    pub fn drain_due(&self, now: DateTime<Utc>) -> Vec<QueuedTask> {
        let mut tasks = self.lock();
        let (mut due, rest): (Vec<_>, Vec<_>) = tasks.drain(..).partition(|t| t.is_due(now));
        *tasks = rest;
        due.sort_by_key(|t| t.process_at);
        due
    }

    fn push(&self, task: QueuedTask) -> EnqueueInfo {
        let info = EnqueueInfo {
            queue: QUEUE_NAME.to_string(),
            task_id: task.id.clone(),
            next_process_at: task.process_at,
        };
        self.lock().push(task);
        info
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<QueuedTask>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(
        &self,
        task_type: &str,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> anyhow::Result<EnqueueInfo> {
        let task = QueuedTask::new(task_type, payload, options);
        // Same id while still pending is a duplicate submission.
        if let Some(existing) = self.lock().iter().find(|t| t.id == task.id) {
            debug!(task_id = %task.id, "duplicate task ignored");
            return Ok(EnqueueInfo {
                queue: QUEUE_NAME.to_string(),
                task_id: existing.id.clone(),
                next_process_at: existing.process_at,
            });
        }
        Ok(self.push(task))
    }

    async fn requeue(&self, task: QueuedTask) -> anyhow::Result<EnqueueInfo> {
        Ok(self.push(task))
    }
}

/// Polls an [`InMemoryTaskQueue`] and feeds due tasks through a [`TaskRouter`].
pub struct InMemoryWorker {
    queue: Arc<InMemoryTaskQueue>,
    router: Arc<TaskRouter>,
    poll_interval: Duration,
    concurrency: usize,
}

impl InMemoryWorker {
    pub fn new(
        queue: Arc<InMemoryTaskQueue>,
        router: Arc<TaskRouter>,
        poll_interval: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            queue,
            router,
            poll_interval,
            concurrency: concurrency.max(1),
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!(poll_interval = ?self.poll_interval, "in-memory worker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            self.run_once(&cancel).await;
        }
        info!("in-memory worker stopped");
    }

    /// Processes every task due now. Returns how many were run.
    pub async fn run_once(&self, cancel: &CancellationToken) -> usize {
        let due = self.queue.drain_due(Utc::now());
        let count = due.len();

        futures::stream::iter(due)
            .for_each_concurrent(self.concurrency, |task| async move {
                match self.router.process(cancel, &task).await {
                    TaskOutcome::Completed | TaskOutcome::Dropped(_) => {}
                    TaskOutcome::Retry(next) => {
                        self.queue.push(next);
                    }
                    TaskOutcome::Deferred(until) => {
                        let mut later = task;
                        later.process_at = until;
                        self.queue.push(later);
                    }
                }
            })
            .await;

        count
    }
}
