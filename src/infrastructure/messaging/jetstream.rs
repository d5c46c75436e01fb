use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_nats::{
    HeaderMap,
    jetstream::{
        self, AckKind,
        consumer::{AckPolicy, PullConsumer, pull},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    application::{
        handlers::{TaskOutcome, TaskRouter},
        services::{EnqueueInfo, EnqueueOptions, QueuedTask, TaskQueue},
    },
    config::AppConfig,
};

const HEADER_TASK_ID: &str = "X-Task-Id";
const HEADER_TASK_TYPE: &str = "X-Task-Type";
const HEADER_ATTEMPT: &str = "X-Attempt";
const HEADER_MAX_RETRY: &str = "X-Max-Retry";
const HEADER_PROCESS_AT: &str = "X-Process-At";
const HEADER_MSG_ID: &str = "Nats-Msg-Id";

#[derive(Clone)]
pub struct JetstreamConfig {
    pub url: String,
    pub stream: String,
    pub subject: String,
    pub durable: String,
    pub pull_batch: usize,
    pub ack_wait_seconds: u64,
}

impl JetstreamConfig {
    /// `None` when no NATS server is configured.
    pub fn from_app(config: &AppConfig) -> Option<Self> {
        Some(Self {
            url: config.nats_url.clone()?,
            stream: config.jetstream_stream.clone(),
            subject: config.jetstream_subject.clone(),
            durable: config.jetstream_durable.clone(),
            pull_batch: config.pull_batch.max(1),
            ack_wait_seconds: 60,
        })
    }
}

/// Task queue backed by a JetStream stream. Task metadata travels in headers;
/// the payload is the task body untouched.
pub struct JetstreamTaskQueue {
    context: jetstream::Context,
    subject: String,
}

impl JetstreamTaskQueue {
    pub async fn connect(config: &JetstreamConfig) -> anyhow::Result<(Arc<Self>, JetstreamWorker)> {
        let client = async_nats::connect(&config.url)
            .await
            .with_context(|| format!("failed to connect to NATS at {}", config.url))?;
        let context = jetstream::new(client);

        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream.clone(),
                subjects: vec![config.subject.clone()],
                ..Default::default()
            })
            .await?;

        // Redelivery is driven by the task router, so the consumer never gives up.
        let consumer = stream
            .get_or_create_consumer(
                &config.durable,
                pull::Config {
                    durable_name: Some(config.durable.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: Duration::from_secs(config.ack_wait_seconds),
                    max_deliver: -1,
                    ..Default::default()
                },
            )
            .await?;
        info!(stream = %config.stream, subject = %config.subject, "jetstream task queue ready");

        let queue = Arc::new(Self {
            context,
            subject: config.subject.clone(),
        });

        let worker = JetstreamWorker {
            consumer,
            pull_batch: config.pull_batch,
        };

        Ok((queue, worker))
    }

    async fn publish(&self, task: &QueuedTask, dedupe: bool) -> anyhow::Result<EnqueueInfo> {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_TASK_ID, task.id.as_str());
        headers.insert(HEADER_TASK_TYPE, task.task_type.as_str());
        headers.insert(HEADER_ATTEMPT, task.attempt.to_string().as_str());
        headers.insert(HEADER_MAX_RETRY, task.max_retry.to_string().as_str());
        headers.insert(HEADER_PROCESS_AT, task.process_at.to_rfc3339().as_str());
        if dedupe {
            headers.insert(HEADER_MSG_ID, task.id.as_str());
        }

        let ack = self
            .context
            .publish_with_headers(self.subject.clone(), headers, task.payload.clone().into())
            .await?
            .await?;
        if ack.duplicate {
            debug!(task_id = %task.id, "duplicate task ignored by stream");
        }

        Ok(EnqueueInfo {
            queue: ack.stream,
            task_id: task.id.clone(),
            next_process_at: task.process_at,
        })
    }
}

#[async_trait]
impl TaskQueue for JetstreamTaskQueue {
    async fn enqueue(
        &self,
        task_type: &str,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> anyhow::Result<EnqueueInfo> {
        let task = QueuedTask::new(task_type, payload, options);
        self.publish(&task, true).await
    }

    async fn requeue(&self, task: QueuedTask) -> anyhow::Result<EnqueueInfo> {
        self.publish(&task, false).await
    }
}

pub struct JetstreamWorker {
    consumer: PullConsumer,
    pull_batch: usize,
}

impl JetstreamWorker {
    pub fn spawn(
        self,
        router: Arc<TaskRouter>,
        queue: Arc<JetstreamTaskQueue>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(err) = self.run(router, queue, cancel).await {
                error!(error = ?err, "jetstream worker stopped");
            }
        })
    }

    async fn run(
        self,
        router: Arc<TaskRouter>,
        queue: Arc<JetstreamTaskQueue>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        loop {
            let pulled = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("jetstream worker shutting down");
                    return Ok(());
                }
                pulled = self.consumer.batch().max_messages(self.pull_batch).messages() => pulled?,
            };

            let mut batch = pulled;
            let mut running = JoinSet::new();
            while let Some(message) = batch.next().await {
                match message {
                    Ok(message) => {
                        let router = router.clone();
                        let queue = queue.clone();
                        let cancel = cancel.clone();
                        running.spawn(async move {
                            if let Err(err) = Self::process_message(message, &router, &queue, &cancel).await {
                                error!(error = ?err, "failed to process task message");
                            }
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "jetstream batch error");
                    }
                }
            }
            while running.join_next().await.is_some() {}
        }
    }

    async fn process_message(
        message: jetstream::Message,
        router: &TaskRouter,
        queue: &JetstreamTaskQueue,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let task = match decode_task(&message) {
            Ok(task) => task,
            Err(err) => {
                warn!(error = %err, "discarding undecodable task message");
                return ack(&message, AckKind::Term).await;
            }
        };

        match router.process(cancel, &task).await {
            TaskOutcome::Completed => ack(&message, AckKind::Ack).await,
            TaskOutcome::Dropped(_) => ack(&message, AckKind::Term).await,
            TaskOutcome::Deferred(until) => {
                let delay = (until - Utc::now()).to_std().unwrap_or_default();
                ack(&message, AckKind::Nak(Some(delay))).await
            }
            TaskOutcome::Retry(next) => {
                queue.requeue(next).await?;
                ack(&message, AckKind::Ack).await
            }
        }
    }
}

async fn ack(message: &jetstream::Message, kind: AckKind) -> anyhow::Result<()> {
    message
        .ack_with(kind)
        .await
        .map_err(|e| anyhow!("failed to ack message: {}", e))
}

fn decode_task(message: &jetstream::Message) -> anyhow::Result<QueuedTask> {
    let headers = message
        .headers
        .as_ref()
        .ok_or_else(|| anyhow!("task message has no headers"))?;
    let header = |name: &str| headers.get(name).map(|value| value.as_str().to_string());

    let task_type = header(HEADER_TASK_TYPE).ok_or_else(|| anyhow!("missing {HEADER_TASK_TYPE}"))?;
    let id = header(HEADER_TASK_ID).ok_or_else(|| anyhow!("missing {HEADER_TASK_ID}"))?;
    let attempt = header(HEADER_ATTEMPT)
        .map(|v| v.parse::<u32>())
        .transpose()
        .context("invalid attempt header")?
        .unwrap_or(0);
    let max_retry = header(HEADER_MAX_RETRY)
        .map(|v| v.parse::<u32>())
        .transpose()
        .context("invalid max retry header")?
        .unwrap_or(0);
    let process_at = header(HEADER_PROCESS_AT)
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(QueuedTask {
        id,
        task_type,
        payload: message.payload.to_vec(),
        attempt,
        max_retry,
        process_at,
    })
}
