use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Delay before the task becomes eligible for processing.
    pub process_in: Duration,
    /// Generated when absent.
    pub task_id: Option<String>,
    /// Queue-level redeliveries allowed after the first failed run.
    pub max_retry: u32,
}

#[derive(Debug, Clone)]
pub struct EnqueueInfo {
    pub queue: String,
    pub task_id: String,
    pub next_process_at: DateTime<Utc>,
}

/// A task as it travels through the queue.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub id: String,
    pub task_type: String,
    pub payload: Vec<u8>,
    /// Zero for the first run.
    pub attempt: u32,
    pub max_retry: u32,
    pub process_at: DateTime<Utc>,
}

impl QueuedTask {
    pub fn new(task_type: &str, payload: Vec<u8>, options: EnqueueOptions) -> Self {
        let process_in =
            chrono::Duration::from_std(options.process_in).unwrap_or(chrono::Duration::zero());
        Self {
            id: options
                .task_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            task_type: task_type.to_string(),
            payload,
            attempt: 0,
            max_retry: options.max_retry,
            process_at: Utc::now() + process_in,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.process_at
    }

    pub fn retries_left(&self) -> bool {
        self.attempt < self.max_retry
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(
        &self,
        task_type: &str,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> anyhow::Result<EnqueueInfo>;

    /// Puts an already-built task back on the queue, keeping its id and counters.
    async fn requeue(&self, task: QueuedTask) -> anyhow::Result<EnqueueInfo>;
}
