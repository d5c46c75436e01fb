use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use poem::{
    EndpointExt, Route, Server, handler,
    http::StatusCode,
    listener::TcpAcceptor,
    post,
    test::TestClient,
    web::{Data, Json, Path},
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use workorder_notify::{
    application::{
        handlers::{DispatchManager, QueueBackoff, TaskRouter},
        usecases::{ScheduleNotificationRequest, ScheduleNotificationUseCase},
    },
    config::{ChannelSettings, ConfigSource, FeishuConfig, NotificationConfig, StaticConfigSource},
    domain::{
        errors::NotifyError,
        models::{SendRequest, SendStatus},
    },
    infrastructure::{
        channels::DefaultChannelFactory,
        messaging::{InMemoryTaskQueue, InMemoryWorker},
    },
    presentation::http::{endpoints::ApiState, routes},
};

#[derive(Default)]
struct Hooks {
    received: Mutex<Vec<(String, Value)>>,
}

impl Hooks {
    fn cards(&self) -> Vec<(String, Value)> {
        self.received.lock().unwrap().clone()
    }
}

#[handler]
async fn hook(
    Path(token): Path<String>,
    Json(body): Json<Value>,
    Data(hooks): Data<&Arc<Hooks>>,
) -> Json<Value> {
    hooks.received.lock().unwrap().push((token, body));
    Json(json!({ "code": 0, "msg": "success" }))
}

async fn mock_feishu(hooks: Arc<Hooks>) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = TcpAcceptor::from_std(listener).unwrap();
    let app = Route::new().at("/hook/:token", post(hook)).data(hooks);
    tokio::spawn(Server::new_with_acceptor(acceptor).run(app));
    format!("http://{addr}")
}

fn config(base: &str) -> NotificationConfig {
    NotificationConfig {
        feishu: FeishuConfig {
            settings: ChannelSettings {
                enabled: true,
                max_retries: 2,
                retry_interval: Duration::from_millis(10),
                timeout: Duration::from_secs(5),
            },
            webhook_base_url: format!("{base}/hook"),
            webhook_token: "group-token".into(),
            ..Default::default()
        },
        ..Default::default()
    }
}

struct Harness {
    hooks: Arc<Hooks>,
    source: Arc<StaticConfigSource>,
    queue: Arc<InMemoryTaskQueue>,
    manager: Arc<DispatchManager>,
}

async fn harness() -> Harness {
    let hooks = Arc::new(Hooks::default());
    let base = mock_feishu(hooks.clone()).await;
    let source = Arc::new(StaticConfigSource::new(config(&base)));
    let queue = Arc::new(InMemoryTaskQueue::new());
    let manager = Arc::new(
        DispatchManager::new(source.clone(), Arc::new(DefaultChannelFactory))
            .unwrap()
            .with_queue(queue.clone()),
    );
    Harness {
        hooks,
        source,
        queue,
        manager,
    }
}

fn group_request(content: &str) -> SendRequest {
    SendRequest {
        subject: "Ticket update".into(),
        content: content.into(),
        recipient_addr: "oc_abc123".into(),
        recipient_name: "Alice".into(),
        work_order_id: Some(7),
        ..Default::default()
    }
}

#[tokio::test]
async fn group_send_renders_and_posts_a_card() {
    let h = harness().await;

    let response = h
        .manager
        .send_notification(&CancellationToken::new(), group_request("Hello {recipient_name}"))
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.status, SendStatus::Sent);
    assert!(!response.message_id.is_empty());

    let cards = h.hooks.cards();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].0, "group-token");
    assert!(cards[0].1.to_string().contains("Hello Alice"));
    assert!(cards[0].1.to_string().contains("WO-7"));
}

#[tokio::test]
async fn email_is_unavailable_when_disabled() {
    let h = harness().await;
    let request = SendRequest {
        recipient_addr: "bob@example.com".into(),
        content: "x".into(),
        ..Default::default()
    };

    let failure = h
        .manager
        .send_notification(&CancellationToken::new(), request)
        .await
        .unwrap_err();
    assert!(matches!(failure.error, NotifyError::ChannelDisabled(_)));
    assert_eq!(failure.response.status, SendStatus::Failed);
    assert_eq!(h.manager.get_available_channels().await, vec!["feishu".to_string()]);
}

#[tokio::test]
async fn queued_send_is_delivered_by_the_worker() {
    let h = harness().await;
    let router = Arc::new(TaskRouter::for_manager(
        h.manager.clone(),
        QueueBackoff::default(),
    ));
    let worker = InMemoryWorker::new(h.queue.clone(), router, Duration::from_millis(10), 4);

    let info = h
        .manager
        .send_notification_async(group_request("queued"), Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(info.queue, "in-memory");
    assert!(h.hooks.cards().is_empty());

    assert_eq!(worker.run_once(&CancellationToken::new()).await, 1);
    assert_eq!(h.hooks.cards().len(), 1);
    assert!(h.queue.pending().is_empty());
}

#[tokio::test]
async fn queued_batch_is_delivered_by_the_worker() {
    let h = harness().await;
    let router = Arc::new(TaskRouter::for_manager(
        h.manager.clone(),
        QueueBackoff::default(),
    ));
    let worker = InMemoryWorker::new(h.queue.clone(), router, Duration::from_millis(10), 4);

    h.manager
        .batch_send_notification_async(
            vec![group_request("first"), group_request("second")],
            Duration::ZERO,
        )
        .await
        .unwrap();

    assert_eq!(worker.run_once(&CancellationToken::new()).await, 1);
    assert_eq!(h.hooks.cards().len(), 2);
    assert!(h.queue.pending().is_empty());
}

#[tokio::test]
async fn scheduled_send_waits_for_its_time() {
    let h = harness().await;
    let router = Arc::new(TaskRouter::for_manager(
        h.manager.clone(),
        QueueBackoff::default(),
    ));
    let worker = InMemoryWorker::new(h.queue.clone(), router, Duration::from_millis(10), 4);
    let usecase = ScheduleNotificationUseCase::new(h.manager.clone());

    usecase
        .execute(ScheduleNotificationRequest {
            request: group_request("later"),
            scheduled_at: Utc::now() + chrono::Duration::hours(1),
            recurrence: None,
        })
        .await
        .unwrap();

    assert_eq!(worker.run_once(&CancellationToken::new()).await, 0);
    assert_eq!(h.queue.pending().len(), 1);
    assert!(h.hooks.cards().is_empty());
}

#[tokio::test]
async fn reload_picks_up_new_webhook_token() {
    let h = harness().await;
    let mut updated = h.source.load().unwrap();
    updated.feishu.webhook_token = "rotated".into();
    h.source.replace(updated);

    h.manager.reload_channel("feishu").await.unwrap();
    h.manager
        .send_notification(&CancellationToken::new(), group_request("after reload"))
        .await
        .unwrap();
    assert_eq!(h.hooks.cards()[0].0, "rotated");

    let mut broken = h.source.load().unwrap();
    broken.feishu.webhook_token.clear();
    broken.feishu.app_id.clear();
    h.source.replace(broken);
    assert!(h.manager.reload_channel("feishu").await.is_err());
    assert_eq!(h.manager.get_available_channels().await, vec!["feishu".to_string()]);
}

#[tokio::test]
async fn admin_api_sends_and_reports() {
    let h = harness().await;
    let state = Arc::new(ApiState::new(h.manager.clone(), CancellationToken::new()));
    let client = TestClient::new(routes(state, "http://localhost:8080"));

    let resp = client.get("/api/health").send().await;
    resp.assert_status_is_ok();
    let body = resp.json().await;
    body.value().object().get("status").assert_string("ok");
    body.value().object().get("queue_attached").assert_bool(true);

    let resp = client
        .post("/api/notifications")
        .body_json(&json!({
            "content": "Hello {recipient_name}",
            "recipient_addr": "oc_abc123",
            "recipient_name": "Alice",
            "priority": "high"
        }))
        .send()
        .await;
    resp.assert_status_is_ok();
    let body = resp.json().await;
    body.value().object().get("status").assert_string("sent");
    body.value().object().get("success").assert_bool(true);

    let resp = client
        .post("/api/notifications")
        .body_json(&json!({ "content": "x", "recipient_addr": "bob@example.com" }))
        .send()
        .await;
    resp.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let resp = client
        .post("/api/notifications/batch")
        .body_json(&json!({
            "notifications": [
                { "content": "one", "recipient_addr": "oc_1" },
                { "content": "two", "recipient_addr": "bob@example.com" }
            ]
        }))
        .send()
        .await;
    resp.assert_status_is_ok();
    let body = resp.json().await;
    body.value().object().get("total").assert_i64(2);
    body.value().object().get("successful").assert_i64(1);

    let resp = client.get("/api/channels").send().await;
    resp.assert_status_is_ok();
    resp.json()
        .await
        .value()
        .object()
        .get("channels")
        .array()
        .assert_len(1);

    client
        .post("/api/channels/pager/reload")
        .send()
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let stats: HashMap<String, u64> = h
        .manager
        .get_channel_stats()
        .await
        .into_iter()
        .map(|s| (s.name, s.counters.sent))
        .collect();
    assert_eq!(stats["feishu"], 2);
}
