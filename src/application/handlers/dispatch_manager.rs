use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    application::services::{
        ChannelFactory, ChannelResolver, EnqueueInfo, EnqueueOptions, NotificationChannel,
        TaskQueue, template::{build_variables, substitute},
    },
    config::{ConfigSource, NotificationConfig},
    domain::{
        errors::{DispatchFailure, NotifyError},
        events::{BatchSendTaskPayload, SendTaskPayload, TASK_BATCH_SEND, TASK_SEND},
        models::{ChannelKind, SendRequest, SendResponse},
    },
};

/// How many delivery attempts a single dispatch may make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Up to `max_retries + 1` attempts with the channel's retry interval between them.
    Channel,
    /// Exactly one attempt; the caller (the task queue) owns retry.
    SingleAttempt,
}

struct Registry {
    config: Arc<NotificationConfig>,
    channels: HashMap<ChannelKind, Arc<dyn NotificationChannel>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelCounters {
    pub requests: u64,
    pub attempts: u64,
    pub sent: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub last_error: Option<String>,
    pub last_sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub name: String,
    pub registered: bool,
    pub enabled: bool,
    pub max_retries: u32,
    pub retry_interval_secs: u64,
    #[serde(flatten)]
    pub counters: ChannelCounters,
}

/// Routes notifications to channels and owns the per-send retry loop.
pub struct DispatchManager {
    registry: RwLock<Registry>,
    config_source: Arc<dyn ConfigSource>,
    factory: Arc<dyn ChannelFactory>,
    resolver: ChannelResolver,
    queue: Option<Arc<dyn TaskQueue>>,
    counters: Mutex<HashMap<ChannelKind, ChannelCounters>>,
}

impl DispatchManager {
    /// Loads configuration and registers every channel that builds. Enabled
    /// channels that fail validation are logged and left out.
    pub fn new(
        config_source: Arc<dyn ConfigSource>,
        factory: Arc<dyn ChannelFactory>,
    ) -> Result<Self, NotifyError> {
        let config = Arc::new(config_source.load()?);
        let mut channels = HashMap::new();

        for kind in factory.kinds() {
            match Self::build_channel(factory.as_ref(), kind, &config) {
                Ok(channel) => {
                    info!(
                        channel = %kind,
                        enabled = channel.is_enabled(),
                        "notification channel registered"
                    );
                    channels.insert(kind, channel);
                }
                Err(err) => {
                    warn!(channel = %kind, error = %err, "notification channel excluded");
                }
            }
        }

        Ok(Self {
            registry: RwLock::new(Registry { config, channels }),
            config_source,
            factory,
            resolver: ChannelResolver::new(),
            queue: None,
            counters: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn queue(&self) -> Option<Arc<dyn TaskQueue>> {
        self.queue.clone()
    }

    fn build_channel(
        factory: &dyn ChannelFactory,
        kind: ChannelKind,
        config: &NotificationConfig,
    ) -> Result<Arc<dyn NotificationChannel>, NotifyError> {
        let channel = factory.build(kind, config)?;
        if channel.is_enabled() {
            channel.validate()?;
        }
        Ok(channel)
    }

    pub async fn send_notification(
        &self,
        cancel: &CancellationToken,
        request: SendRequest,
    ) -> Result<SendResponse, DispatchFailure> {
        self.dispatch(cancel, request, RetryPolicy::Channel).await
    }

    /// One delivery attempt, for callers that own retry themselves.
    pub async fn send_notification_once(
        &self,
        cancel: &CancellationToken,
        request: SendRequest,
    ) -> Result<SendResponse, DispatchFailure> {
        self.dispatch(cancel, request, RetryPolicy::SingleAttempt).await
    }

    pub async fn dispatch(
        &self,
        cancel: &CancellationToken,
        mut request: SendRequest,
        policy: RetryPolicy,
    ) -> Result<SendResponse, DispatchFailure> {
        assign_message_id(&mut request);
        let kind = self.resolver.resolve(&request);
        self.bump(kind, |c| c.requests += 1);

        let channel = match self.channel(kind).await {
            Ok(channel) => channel,
            Err(err) => {
                warn!(message_id = %request.message_id, channel = %kind, error = %err, "channel resolution failed");
                self.record_failure(kind, &err);
                let response = SendResponse::failed(&request.message_id, err.to_string());
                return Err(DispatchFailure::new(response, err));
            }
        };

        let request = render(request);
        let max_retries = match policy {
            RetryPolicy::Channel => channel.max_retries(),
            RetryPolicy::SingleAttempt => 0,
        };

        self.run_attempts(cancel, channel.as_ref(), &request, max_retries)
            .await
    }

    async fn run_attempts(
        &self,
        cancel: &CancellationToken,
        channel: &dyn NotificationChannel,
        request: &SendRequest,
        max_retries: u32,
    ) -> Result<SendResponse, DispatchFailure> {
        let kind = channel.kind();
        let interval = channel.retry_interval();
        let mut attempts = 0u32;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if cancel.is_cancelled() {
                return Err(self.cancelled(kind, request, attempts));
            }
            if attempt > 0 {
                debug!(message_id = %request.message_id, channel = %kind, ?interval, "waiting before retry");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(self.cancelled(kind, request, attempts));
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }

            attempts += 1;
            self.bump(kind, |c| c.attempts += 1);

            match channel.send(cancel, request).await {
                Ok(response) => {
                    info!(
                        message_id = %request.message_id,
                        channel = %kind,
                        attempt = attempts,
                        external_id = response.external_id.as_deref().unwrap_or(""),
                        "notification sent"
                    );
                    self.bump(kind, |c| {
                        c.sent += 1;
                        c.last_sent_at = Some(response.timestamp);
                    });
                    return Ok(response);
                }
                Err(NotifyError::Cancelled) => {
                    return Err(self.cancelled(kind, request, attempts));
                }
                Err(err) => {
                    warn!(
                        message_id = %request.message_id,
                        channel = %kind,
                        attempt = attempts,
                        max_attempts = max_retries + 1,
                        error = %err,
                        "notification attempt failed"
                    );
                    let retryable = err.is_retryable();
                    last_error = Some(err);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        let err = last_error.unwrap_or_else(|| NotifyError::provider("no delivery attempt was made"));
        self.record_failure(kind, &err);

        let mut response = SendResponse::failed(
            &request.message_id,
            format!("send failed after {attempts} attempt(s): {err}"),
        );
        if let NotifyError::Provider { body: Some(body), .. } = &err {
            response = response.with_provider_response(
                serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.clone())),
            );
        }
        Err(DispatchFailure::new(response, err))
    }

    fn cancelled(&self, kind: ChannelKind, request: &SendRequest, attempts: u32) -> DispatchFailure {
        info!(message_id = %request.message_id, channel = %kind, attempts, "notification cancelled");
        self.bump(kind, |c| c.cancelled += 1);
        DispatchFailure::new(
            SendResponse::cancelled(
                &request.message_id,
                format!("cancelled after {attempts} attempt(s)"),
            ),
            NotifyError::Cancelled,
        )
    }

    /// Sends every request concurrently, one task per request. The result at
    /// index `i` always belongs to `requests[i]`.
    pub async fn batch_send_notification(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        requests: Vec<SendRequest>,
    ) -> Vec<SendResponse> {
        self.batch(cancel, requests, RetryPolicy::Channel)
            .await
            .into_iter()
            .map(|outcome| outcome.unwrap_or_else(|failure| failure.response))
            .collect()
    }

    /// Dispatches every request concurrently. Outcomes follow input order and
    /// keep the error behind each failure.
    pub async fn batch(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        requests: Vec<SendRequest>,
        policy: RetryPolicy,
    ) -> Vec<Result<SendResponse, DispatchFailure>> {
        let mut ids = Vec::with_capacity(requests.len());
        let mut handles = Vec::with_capacity(requests.len());

        for mut request in requests {
            assign_message_id(&mut request);
            ids.push(request.message_id.clone());

            let manager = Arc::clone(self);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                manager.dispatch(&cancel, request, policy).await
            }));
        }

        join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, message_id)| {
                joined.unwrap_or_else(|err| {
                    let reason = format!("send task aborted: {err}");
                    Err(DispatchFailure::new(
                        SendResponse::failed(message_id, &reason),
                        NotifyError::Queue(reason),
                    ))
                })
            })
            .collect()
    }

    /// Hands the request to the task queue for delivery after `delay`. The
    /// queue retries up to the channel's `max_retries`.
    pub async fn send_notification_async(
        &self,
        mut request: SendRequest,
        delay: Duration,
    ) -> Result<EnqueueInfo, NotifyError> {
        assign_message_id(&mut request);
        let max_retry = self.queue_retry_budget(&request).await?;
        let task_id = request.message_id.clone();
        let payload = serde_json::to_vec(&SendTaskPayload {
            request,
            created_at: Utc::now(),
        })?;

        self.enqueue(
            TASK_SEND,
            payload,
            EnqueueOptions {
                process_in: delay,
                task_id: Some(task_id),
                max_retry,
            },
        )
        .await
    }

    /// Enqueues the whole batch as one task. Items that fail on replay are
    /// re-enqueued one by one, so the batch task itself is never retried.
    pub async fn batch_send_notification_async(
        &self,
        requests: Vec<SendRequest>,
        delay: Duration,
    ) -> Result<EnqueueInfo, NotifyError> {
        if requests.is_empty() {
            return Err(NotifyError::InvalidInput("batch is empty".into()));
        }

        let requests = requests
            .into_iter()
            .map(|mut request| {
                assign_message_id(&mut request);
                request
            })
            .collect();
        let payload = serde_json::to_vec(&BatchSendTaskPayload {
            requests,
            created_at: Utc::now(),
        })?;

        self.enqueue(
            TASK_BATCH_SEND,
            payload,
            EnqueueOptions {
                process_in: delay,
                task_id: None,
                max_retry: 0,
            },
        )
        .await
    }

    pub async fn enqueue(
        &self,
        task_type: &str,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> Result<EnqueueInfo, NotifyError> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| NotifyError::Queue("no task queue configured".into()))?;

        let info = queue
            .enqueue(task_type, payload, options)
            .await
            .map_err(|err| NotifyError::Queue(err.to_string()))?;
        info!(
            task_type,
            task_id = %info.task_id,
            queue = %info.queue,
            next_process_at = %info.next_process_at,
            "notification task enqueued"
        );
        Ok(info)
    }

    /// The queue-level retry count for a request: its channel's `max_retries`.
    /// Fails when the request cannot be routed.
    pub async fn queue_retry_budget(&self, request: &SendRequest) -> Result<u32, NotifyError> {
        let kind = self.resolver.resolve(request);
        Ok(self.channel(kind).await?.max_retries())
    }

    async fn channel(&self, kind: ChannelKind) -> Result<Arc<dyn NotificationChannel>, NotifyError> {
        let channel = {
            let registry = self.registry.read().await;
            registry.channels.get(&kind).cloned()
        }
        .ok_or_else(|| NotifyError::ChannelNotFound(kind.to_string()))?;

        if !channel.is_enabled() {
            return Err(NotifyError::ChannelDisabled(kind.to_string()));
        }
        Ok(channel)
    }

    /// Builds the named channel from freshly loaded configuration and
    /// validates it, without touching the registry.
    pub async fn validate_channel_config(&self, name: &str) -> Result<(), NotifyError> {
        let kind = parse_kind(name)?;
        let config = self.config_source.load()?;
        let channel = self.factory.build(kind, &config)?;
        channel.validate()
    }

    /// Reloads configuration and swaps in a new instance of the named channel.
    /// On any failure the current instance stays active.
    pub async fn reload_channel(&self, name: &str) -> Result<(), NotifyError> {
        let kind = parse_kind(name)?;
        let config = self.config_source.load().inspect_err(|err| {
            warn!(channel = %kind, error = %err, "reload aborted: configuration unreadable");
        })?;
        let channel = Self::build_channel(self.factory.as_ref(), kind, &config).inspect_err(|err| {
            warn!(channel = %kind, error = %err, "reload aborted: validation failed");
        })?;

        let mut registry = self.registry.write().await;
        registry.config = Arc::new(config);
        registry.channels.insert(kind, channel);
        info!(channel = %kind, "notification channel reloaded");
        Ok(())
    }

    /// Names of registered, enabled channels.
    pub async fn get_available_channels(&self) -> Vec<String> {
        let registry = self.registry.read().await;
        let mut names: Vec<String> = registry
            .channels
            .values()
            .filter(|channel| channel.is_enabled())
            .map(|channel| channel.name().to_string())
            .collect();
        names.sort();
        names
    }

    pub async fn get_channel_stats(&self) -> Vec<ChannelStats> {
        let (config, channels) = {
            let registry = self.registry.read().await;
            (Arc::clone(&registry.config), registry.channels.clone())
        };
        let counters = self.counters.lock().unwrap_or_else(|p| p.into_inner()).clone();

        self.factory
            .kinds()
            .into_iter()
            .map(|kind| {
                let channel = channels.get(&kind);
                let settings = config.settings(kind);
                ChannelStats {
                    name: kind.to_string(),
                    registered: channel.is_some(),
                    enabled: channel.is_some_and(|c| c.is_enabled()),
                    max_retries: channel.map_or(settings.max_retries, |c| c.max_retries()),
                    retry_interval_secs: channel
                        .map_or(settings.retry_interval, |c| c.retry_interval())
                        .as_secs(),
                    counters: counters.get(&kind).cloned().unwrap_or_default(),
                }
            })
            .collect()
    }

    pub async fn config(&self) -> Arc<NotificationConfig> {
        Arc::clone(&self.registry.read().await.config)
    }

    fn record_failure(&self, kind: ChannelKind, err: &NotifyError) {
        let message = err.to_string();
        self.bump(kind, |c| {
            c.failed += 1;
            c.last_error = Some(message);
        });
    }

    fn bump(&self, kind: ChannelKind, update: impl FnOnce(&mut ChannelCounters)) {
        let mut counters = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        update(counters.entry(kind).or_default());
    }
}

pub fn assign_message_id(request: &mut SendRequest) {
    if request.message_id.trim().is_empty() {
        request.message_id = Uuid::new_v4().to_string();
    }
}

fn parse_kind(name: &str) -> Result<ChannelKind, NotifyError> {
    ChannelKind::from_str(name.trim()).ok_or_else(|| NotifyError::ChannelNotFound(name.to_string()))
}

/// Fills placeholders in subject and content from the same variable set.
fn render(mut request: SendRequest) -> SendRequest {
    let variables = build_variables(&request, Utc::now());
    request.subject = substitute(&request.subject, &variables);
    request.content = substitute(&request.content, &variables);
    request
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::StaticConfigSource;
    use crate::domain::models::SendStatus;
    use crate::infrastructure::messaging::in_memory::InMemoryTaskQueue;

    pub(crate) struct StubChannel {
        pub kind: ChannelKind,
        pub enabled: bool,
        pub valid: bool,
        pub max_retries: u32,
        pub interval: Duration,
        /// Number of leading calls that fail; `u32::MAX` fails forever.
        pub fail_first: u32,
        pub error: NotifyError,
        pub calls: AtomicU32,
        pub seen: Mutex<Vec<SendRequest>>,
    }

    impl StubChannel {
        pub fn new(kind: ChannelKind) -> Self {
            Self {
                kind,
                enabled: true,
                valid: true,
                max_retries: 3,
                interval: Duration::from_millis(1),
                fail_first: 0,
                error: NotifyError::provider("stub failure"),
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotificationChannel for StubChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(
            &self,
            _cancel: &CancellationToken,
            request: &SendRequest,
        ) -> Result<SendResponse, NotifyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen.lock().unwrap().push(request.clone());

            if let Some(delay) = request.metadata.get("delay_ms").and_then(|v| v.as_u64()) {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            if call <= self.fail_first {
                return Err(self.error.clone());
            }
            Ok(SendResponse::sent(&request.message_id, Some(request.subject.clone())))
        }

        fn validate(&self) -> Result<(), NotifyError> {
            if self.valid {
                Ok(())
            } else {
                Err(NotifyError::Config("stub is misconfigured".into()))
            }
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        fn max_retries(&self) -> u32 {
            self.max_retries
        }

        fn retry_interval(&self) -> Duration {
            self.interval
        }
    }

    /// Hands out pre-built stubs. Entries may be swapped to simulate reloads.
    pub(crate) struct StubFactory {
        pub channels: Mutex<HashMap<ChannelKind, Arc<StubChannel>>>,
    }

    impl StubFactory {
        pub fn new(stubs: Vec<StubChannel>) -> Arc<Self> {
            Arc::new(Self {
                channels: Mutex::new(stubs.into_iter().map(|s| (s.kind, Arc::new(s))).collect()),
            })
        }

        pub fn stub(&self, kind: ChannelKind) -> Arc<StubChannel> {
            Arc::clone(&self.channels.lock().unwrap()[&kind])
        }

        pub fn swap(&self, stub: StubChannel) {
            self.channels.lock().unwrap().insert(stub.kind, Arc::new(stub));
        }
    }

    impl ChannelFactory for StubFactory {
        fn build(
            &self,
            kind: ChannelKind,
            _config: &NotificationConfig,
        ) -> Result<Arc<dyn NotificationChannel>, NotifyError> {
            self.channels
                .lock()
                .unwrap()
                .get(&kind)
                .cloned()
                .map(|stub| stub as Arc<dyn NotificationChannel>)
                .ok_or_else(|| NotifyError::ChannelNotFound(kind.to_string()))
        }
    }

    fn manager(factory: Arc<StubFactory>) -> Arc<DispatchManager> {
        let source = Arc::new(StaticConfigSource::new(NotificationConfig::default()));
        Arc::new(DispatchManager::new(source, factory).unwrap())
    }

    fn email_request(content: &str) -> SendRequest {
        SendRequest {
            subject: "Subject".into(),
            content: content.into(),
            recipient_type: "email".into(),
            recipient_addr: "alice@example.com".into(),
            recipient_name: "Alice".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn assigns_message_id_before_invoking_channel() {
        let factory = StubFactory::new(vec![StubChannel::new(ChannelKind::Email)]);
        let manager = manager(factory.clone());

        let response = manager
            .send_notification(&CancellationToken::new(), email_request("hi"))
            .await
            .unwrap();

        let seen = factory.stub(ChannelKind::Email).seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].message_id.is_empty());
        assert_eq!(response.message_id, seen[0].message_id);
    }

    #[tokio::test]
    async fn keeps_caller_supplied_message_id() {
        let factory = StubFactory::new(vec![StubChannel::new(ChannelKind::Email)]);
        let manager = manager(factory);
        let mut request = email_request("hi");
        request.message_id = "fixed-id".into();

        let response = manager
            .send_notification(&CancellationToken::new(), request)
            .await
            .unwrap();
        assert_eq!(response.message_id, "fixed-id");
    }

    #[tokio::test]
    async fn end_to_end_renders_and_sends() {
        let factory = StubFactory::new(vec![StubChannel::new(ChannelKind::Email)]);
        let manager = manager(factory.clone());

        let response = manager
            .send_notification(&CancellationToken::new(), email_request("Hello {recipient_name}"))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.status, SendStatus::Sent);
        let seen = factory.stub(ChannelKind::Email).seen.lock().unwrap().clone();
        assert!(seen[0].content.contains("Hello Alice"));
    }

    #[tokio::test]
    async fn always_failing_channel_is_called_max_retries_plus_one_times() {
        let mut stub = StubChannel::new(ChannelKind::Email);
        stub.max_retries = 2;
        stub.fail_first = u32::MAX;
        let factory = StubFactory::new(vec![stub]);
        let manager = manager(factory.clone());

        let failure = manager
            .send_notification(&CancellationToken::new(), email_request("x"))
            .await
            .unwrap_err();

        assert_eq!(factory.stub(ChannelKind::Email).calls(), 3);
        assert!(!failure.response.success);
        assert_eq!(failure.response.status, SendStatus::Failed);
        assert!(failure.response.error_message.unwrap().contains("3 attempt(s)"));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let mut stub = StubChannel::new(ChannelKind::Email);
        stub.fail_first = 2;
        let factory = StubFactory::new(vec![stub]);
        let manager = manager(factory.clone());

        let response = manager
            .send_notification(&CancellationToken::new(), email_request("x"))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(factory.stub(ChannelKind::Email).calls(), 3);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_stops_further_attempts() {
        let mut stub = StubChannel::new(ChannelKind::Email);
        stub.fail_first = u32::MAX;
        stub.interval = Duration::from_secs(60);
        let factory = StubFactory::new(vec![stub]);
        let manager = manager(factory.clone());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let failure = manager
            .send_notification(&cancel, email_request("x"))
            .await
            .unwrap_err();

        assert_eq!(failure.response.status, SendStatus::Cancelled);
        assert!(matches!(failure.error, NotifyError::Cancelled));
        assert_eq!(factory.stub(ChannelKind::Email).calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_prevents_the_first_attempt() {
        let factory = StubFactory::new(vec![StubChannel::new(ChannelKind::Email)]);
        let manager = manager(factory.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let failure = manager
            .send_notification(&cancel, email_request("x"))
            .await
            .unwrap_err();

        assert_eq!(failure.response.status, SendStatus::Cancelled);
        assert_eq!(factory.stub(ChannelKind::Email).calls(), 0);
    }

    #[tokio::test]
    async fn input_errors_are_not_retried() {
        let mut stub = StubChannel::new(ChannelKind::Email);
        stub.fail_first = u32::MAX;
        stub.error = NotifyError::InvalidInput("bad address".into());
        let factory = StubFactory::new(vec![stub]);
        let manager = manager(factory.clone());

        let failure = manager
            .send_notification(&CancellationToken::new(), email_request("x"))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, NotifyError::InvalidInput(_)));
        assert_eq!(factory.stub(ChannelKind::Email).calls(), 1);
    }

    #[tokio::test]
    async fn single_attempt_policy_ignores_channel_retries() {
        let mut stub = StubChannel::new(ChannelKind::Email);
        stub.fail_first = u32::MAX;
        let factory = StubFactory::new(vec![stub]);
        let manager = manager(factory.clone());

        let _ = manager
            .send_notification_once(&CancellationToken::new(), email_request("x"))
            .await
            .unwrap_err();
        assert_eq!(factory.stub(ChannelKind::Email).calls(), 1);
    }

    #[tokio::test]
    async fn disabled_channel_is_a_terminal_error() {
        let mut stub = StubChannel::new(ChannelKind::Email);
        stub.enabled = false;
        let factory = StubFactory::new(vec![stub]);
        let manager = manager(factory.clone());

        let failure = manager
            .send_notification(&CancellationToken::new(), email_request("x"))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, NotifyError::ChannelDisabled(_)));
        assert_eq!(factory.stub(ChannelKind::Email).calls(), 0);
        assert!(manager.get_available_channels().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_channel_is_excluded_at_startup() {
        let mut feishu = StubChannel::new(ChannelKind::Feishu);
        feishu.valid = false;
        let factory = StubFactory::new(vec![StubChannel::new(ChannelKind::Email), feishu]);
        let manager = manager(factory);

        assert_eq!(manager.get_available_channels().await, vec!["email".to_string()]);

        let request = SendRequest {
            recipient_addr: "oc_abc123".into(),
            ..Default::default()
        };
        let failure = manager
            .send_notification(&CancellationToken::new(), request)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, NotifyError::ChannelNotFound(_)));
    }

    #[tokio::test]
    async fn batch_results_follow_input_order() {
        let factory = StubFactory::new(vec![StubChannel::new(ChannelKind::Email)]);
        let manager = manager(factory);

        let requests: Vec<SendRequest> = (0..6u64)
            .map(|i| {
                let mut request = email_request("x");
                request.subject = format!("req-{i}");
                request
                    .metadata
                    .insert("delay_ms".into(), Value::from((6 - i) * 15));
                request
            })
            .collect();

        let responses = manager
            .batch_send_notification(&CancellationToken::new(), requests)
            .await;

        assert_eq!(responses.len(), 6);
        for (i, response) in responses.iter().enumerate() {
            assert!(response.success);
            assert_eq!(response.external_id.as_deref(), Some(format!("req-{i}").as_str()));
        }
    }

    #[tokio::test]
    async fn reload_swaps_channel_and_keeps_old_on_failure() {
        let mut first = StubChannel::new(ChannelKind::Email);
        first.max_retries = 1;
        let factory = StubFactory::new(vec![first]);
        let manager = manager(factory.clone());

        let mut second = StubChannel::new(ChannelKind::Email);
        second.max_retries = 7;
        factory.swap(second);
        manager.reload_channel("email").await.unwrap();
        let stats = manager.get_channel_stats().await;
        assert_eq!(stats.iter().find(|s| s.name == "email").unwrap().max_retries, 7);

        let mut broken = StubChannel::new(ChannelKind::Email);
        broken.valid = false;
        broken.max_retries = 9;
        factory.swap(broken);
        assert!(manager.validate_channel_config("email").await.is_err());
        assert!(manager.reload_channel("email").await.is_err());
        let stats = manager.get_channel_stats().await;
        assert_eq!(stats.iter().find(|s| s.name == "email").unwrap().max_retries, 7);

        assert!(matches!(
            manager.reload_channel("pager").await,
            Err(NotifyError::ChannelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn stats_count_outcomes() {
        let mut stub = StubChannel::new(ChannelKind::Email);
        stub.fail_first = 1;
        stub.max_retries = 0;
        let factory = StubFactory::new(vec![stub]);
        let manager = manager(factory);
        let cancel = CancellationToken::new();

        let _ = manager.send_notification(&cancel, email_request("x")).await;
        let _ = manager.send_notification(&cancel, email_request("x")).await;

        let stats = manager.get_channel_stats().await;
        let email = stats.iter().find(|s| s.name == "email").unwrap();
        assert_eq!(email.counters.requests, 2);
        assert_eq!(email.counters.attempts, 2);
        assert_eq!(email.counters.sent, 1);
        assert_eq!(email.counters.failed, 1);
        assert!(email.counters.last_error.is_some());
    }

    #[tokio::test]
    async fn async_send_enqueues_with_channel_retry_budget() {
        let mut stub = StubChannel::new(ChannelKind::Email);
        stub.max_retries = 4;
        let factory = StubFactory::new(vec![stub]);
        let queue = Arc::new(InMemoryTaskQueue::new());
        let source = Arc::new(StaticConfigSource::new(NotificationConfig::default()));
        let manager = DispatchManager::new(source, factory)
            .unwrap()
            .with_queue(queue.clone());

        let info = manager
            .send_notification_async(email_request("x"), Duration::from_secs(30))
            .await
            .unwrap();

        let pending = queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_type, TASK_SEND);
        assert_eq!(pending[0].max_retry, 4);
        assert_eq!(pending[0].id, info.task_id);
        let payload: SendTaskPayload = serde_json::from_slice(&pending[0].payload).unwrap();
        assert_eq!(payload.request.message_id, info.task_id);
        assert!(info.next_process_at > Utc::now() + chrono::Duration::seconds(20));
    }

    #[tokio::test]
    async fn async_send_without_queue_fails() {
        let factory = StubFactory::new(vec![StubChannel::new(ChannelKind::Email)]);
        let manager = manager(factory);
        let err = manager
            .send_notification_async(email_request("x"), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Queue(_)));
    }
}
