//! Feishu (Lark) chat-bot channel.
//!
//! Group chats (`oc_` ids) are reached through a custom-bot webhook. Every
//! other id is delivered through the IM message API using a tenant access
//! token, which is cached until shortly before it expires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Local;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    application::services::{
        NotificationChannel,
        template::{PLATFORM_NAME, SYSTEM_NOTICE},
    },
    config::FeishuConfig,
    domain::{
        errors::NotifyError,
        models::{ChannelKind, SendRequest, SendResponse},
    },
    utils::{
        FeishuReceiveId, sanitize_content, truncate_chars,
        format::{event_icon, event_text, priority_card_template, priority_icon, priority_text},
    },
};

/// Tokens are refreshed this long before the expiry the server reports.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);
const MAX_CARD_CONTENT_CHARS: usize = 4000;
/// Error codes the IM API returns for an expired or revoked tenant token.
const INVALID_TOKEN_CODES: [i64; 3] = [99991661, 99991663, 99991664];

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct FeishuChannel {
    config: FeishuConfig,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl FeishuChannel {
    pub fn new(config: FeishuConfig) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .user_agent("workorder-notify/feishu")
            .timeout(config.settings.timeout)
            .build()
            .map_err(|err| NotifyError::Config(format!("failed to build feishu client: {err}")))?;

        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    pub fn into_channel(self) -> Arc<dyn NotificationChannel> {
        Arc::new(self)
    }

    fn has_app_credentials(&self) -> bool {
        !self.config.app_id.is_empty() && !self.config.app_secret.is_empty()
    }

    fn has_webhook(&self) -> bool {
        !self.config.webhook_token.is_empty() || !self.config.group_webhooks.is_empty()
    }

    async fn send_group(
        &self,
        chat_id: &str,
        request: &SendRequest,
        card: Value,
    ) -> Result<SendResponse, NotifyError> {
        let token = self
            .config
            .group_webhooks
            .get(chat_id)
            .map(String::as_str)
            .or_else(|| Some(self.config.webhook_token.as_str()).filter(|t| !t.is_empty()))
            .ok_or_else(|| NotifyError::Config(format!("no webhook token for group {chat_id}")))?;

        let url = format!(
            "{}/{}",
            self.config.webhook_base_url.trim_end_matches('/'),
            token
        );
        debug!(message_id = %request.message_id, chat_id, "posting feishu group card");

        let response = self
            .client
            .post(url)
            .json(&json!({ "msg_type": "interactive", "card": card }))
            .send()
            .await
            .map_err(transport_error)?;
        let (body, text) = read_body(response).await?;

        // Custom-bot webhooks answer with either `code` or the legacy `StatusCode`.
        let code = body
            .get("code")
            .or_else(|| body.get("StatusCode"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if code != 0 {
            let msg = body
                .get("msg")
                .or_else(|| body.get("StatusMessage"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(NotifyError::provider_with_body(
                format!("feishu webhook rejected message: code {code}: {msg}"),
                text,
            ));
        }

        Ok(SendResponse::sent(&request.message_id, None).with_provider_response(body))
    }

    async fn send_direct(
        &self,
        receive_id_type: FeishuReceiveId,
        receive_id: &str,
        request: &SendRequest,
        card: Value,
    ) -> Result<SendResponse, NotifyError> {
        let token = self.tenant_token().await?;
        debug!(
            message_id = %request.message_id,
            receive_id_type = receive_id_type.as_str(),
            "posting feishu direct card"
        );

        let response = self
            .client
            .post(&self.config.message_url)
            .query(&[("receive_id_type", receive_id_type.as_str())])
            .bearer_auth(token)
            .json(&json!({
                "receive_id": receive_id,
                "msg_type": "interactive",
                "content": card.to_string(),
            }))
            .send()
            .await
            .map_err(transport_error)?;
        let (body, text) = read_body(response).await?;

        let parsed: ApiResponse<MessageData> = serde_json::from_value(body.clone())
            .map_err(|err| {
                NotifyError::provider_with_body(
                    format!("unexpected feishu response: {err}"),
                    text.clone(),
                )
            })?;
        if parsed.code != 0 {
            if INVALID_TOKEN_CODES.contains(&parsed.code) {
                self.token.lock().await.take();
            }
            return Err(NotifyError::provider_with_body(
                format!("feishu api error {}: {}", parsed.code, parsed.msg),
                text,
            ));
        }

        let external_id = parsed.data.and_then(|data| data.message_id);
        Ok(SendResponse::sent(&request.message_id, external_id).with_provider_response(body))
    }

    /// Returns the cached tenant token, fetching a new one when missing or
    /// near expiry. The lock is held across the fetch so concurrent callers
    /// wait for a single refresh.
    async fn tenant_token(&self) -> Result<String, NotifyError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(token.value.clone());
        }

        if !self.has_app_credentials() {
            return Err(NotifyError::Config(
                "feishu app_id and app_secret are required for direct messages".into(),
            ));
        }

        let response = self
            .client
            .post(&self.config.token_url)
            .json(&json!({
                "app_id": self.config.app_id,
                "app_secret": self.config.app_secret,
            }))
            .send()
            .await
            .map_err(transport_error)?;
        let (body, text) = read_body(response).await?;

        let parsed: TokenResponse = serde_json::from_value(body)
            .map_err(|err| {
                NotifyError::provider_with_body(
                    format!("unexpected token response: {err}"),
                    text.clone(),
                )
            })?;
        let value = match parsed.tenant_access_token {
            Some(value) if parsed.code == 0 && !value.is_empty() => value,
            _ => {
                return Err(NotifyError::provider_with_body(
                    format!("feishu token request failed {}: {}", parsed.code, parsed.msg),
                    text,
                ));
            }
        };

        let ttl = Duration::from_secs(parsed.expire).saturating_sub(TOKEN_REFRESH_MARGIN);
        info!(ttl_secs = ttl.as_secs(), "feishu tenant token refreshed");
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(value)
    }
}

#[async_trait]
impl NotificationChannel for FeishuChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Feishu
    }

    async fn send(
        &self,
        cancel: &CancellationToken,
        request: &SendRequest,
    ) -> Result<SendResponse, NotifyError> {
        let receive_id = request.recipient_addr.trim();
        if receive_id.is_empty() {
            return Err(NotifyError::InvalidInput("feishu recipient is empty".into()));
        }

        let card = build_card(request, self.config.work_order_url.as_deref());
        let kind = FeishuReceiveId::classify(receive_id);

        let delivery = async {
            if kind.is_group() {
                self.send_group(receive_id, request, card).await
            } else {
                self.send_direct(kind, receive_id, request, card).await
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NotifyError::Cancelled),
            result = delivery => result,
        }
    }

    fn validate(&self) -> Result<(), NotifyError> {
        if !self.has_webhook() && !self.has_app_credentials() {
            return Err(NotifyError::Config(
                "feishu needs a webhook token or app credentials".into(),
            ));
        }
        if self.config.app_id.is_empty() != self.config.app_secret.is_empty() {
            return Err(NotifyError::Config(
                "feishu app_id and app_secret must be set together".into(),
            ));
        }
        for (name, url) in [
            ("webhook_base_url", &self.config.webhook_base_url),
            ("token_url", &self.config.token_url),
            ("message_url", &self.config.message_url),
        ] {
            Url::parse(url)
                .map_err(|err| NotifyError::Config(format!("feishu {name} is invalid: {err}")))?;
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.config.settings.enabled
    }

    fn max_retries(&self) -> u32 {
        self.config.settings.max_retries
    }

    fn retry_interval(&self) -> Duration {
        self.config.settings.retry_interval
    }
}

/// Builds the interactive card: colored header, summary fields, body, an
/// optional link to the work order and a footer note.
pub fn build_card(request: &SendRequest, work_order_url: Option<&str>) -> Value {
    let work_order = request
        .work_order_sn()
        .unwrap_or_else(|| SYSTEM_NOTICE.to_string());
    let recipient = if request.recipient_name.is_empty() {
        request.recipient_addr.as_str()
    } else {
        request.recipient_name.as_str()
    };
    let content = truncate_chars(&sanitize_content(&request.content), MAX_CARD_CONTENT_CHARS);

    let field = |label: &str, value: String| {
        json!({
            "is_short": true,
            "text": { "tag": "lark_md", "content": format!("**{label}**\n{value}") }
        })
    };

    let mut elements = vec![
        json!({
            "tag": "div",
            "fields": [
                field("Work order", work_order),
                field(
                    "Priority",
                    format!("{} {}", priority_icon(request.priority), priority_text(request.priority)),
                ),
                field("Event", event_text(request.event_type).to_string()),
                field("Recipient", recipient.to_string()),
            ]
        }),
        json!({ "tag": "hr" }),
        json!({
            "tag": "div",
            "text": { "tag": "lark_md", "content": content }
        }),
    ];

    if let (Some(url), Some(id)) = (work_order_url, request.work_order_id) {
        elements.push(json!({
            "tag": "action",
            "actions": [{
                "tag": "button",
                "type": "primary",
                "text": { "tag": "plain_text", "content": "View work order" },
                "url": url.replace("{id}", &id.to_string()),
            }]
        }));
    }

    elements.push(json!({
        "tag": "note",
        "elements": [{
            "tag": "plain_text",
            "content": format!("{PLATFORM_NAME} · {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
        }]
    }));

    json!({
        "config": { "wide_screen_mode": true },
        "header": {
            "template": priority_card_template(request.priority),
            "title": {
                "tag": "plain_text",
                "content": format!("{} {}", event_icon(request.event_type), request.subject),
            }
        },
        "elements": elements,
    })
}

fn transport_error(err: reqwest::Error) -> NotifyError {
    if err.is_timeout() {
        NotifyError::Timeout(format!("feishu request timed out: {err}"))
    } else {
        NotifyError::provider(format!("feishu request failed: {err}"))
    }
}

/// Reads the body as JSON, keeping the raw text for diagnostics. Non-2xx
/// responses that still carry a Feishu error code are passed through so the
/// caller can act on the code.
async fn read_body(response: reqwest::Response) -> Result<(Value, String), NotifyError> {
    let status = response.status();
    let text = response.text().await.map_err(transport_error)?;
    let body: Option<Value> = serde_json::from_str(&text).ok();

    match body {
        Some(body) if status.is_success() => Ok((body, text)),
        Some(body) if body.get("code").and_then(Value::as_i64).is_some_and(|c| c != 0) => {
            warn!(%status, "feishu returned an error status with an api code");
            Ok((body, text))
        }
        _ if !status.is_success() => {
            warn!(%status, "feishu returned an error status");
            Err(NotifyError::provider_with_body(
                format!("feishu returned HTTP {status}"),
                text,
            ))
        }
        _ => Err(NotifyError::provider_with_body(
            "feishu returned invalid JSON",
            text,
        )),
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    tenant_access_token: Option<String>,
    #[serde(default)]
    expire: u64,
}
