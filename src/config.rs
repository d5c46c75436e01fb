use std::collections::HashMap;
use std::env::var;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

use crate::domain::errors::NotifyError;
use crate::domain::models::ChannelKind;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const FEISHU_TOKEN_URL: &str =
    "https://open.feishu.cn/open-apis/auth/v3/tenant_access_token/internal";
const FEISHU_MESSAGE_URL: &str = "https://open.feishu.cn/open-apis/im/v1/messages";
const FEISHU_WEBHOOK_BASE_URL: &str = "https://open.feishu.cn/open-apis/bot/v2/hook";

/// Process-level settings for the binary: HTTP surface, queue and logging.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub scheme: String,
    pub host: String,
    pub log_json: bool,
    pub nats_url: Option<String>,
    pub jetstream_stream: String,
    pub jetstream_subject: String,
    pub jetstream_durable: String,
    pub pull_batch: usize,
    pub worker_concurrency: usize,
    pub queue_retry_base: Duration,
    pub queue_retry_max: Duration,
}

impl AppConfig {
    pub fn try_parse() -> Result<AppConfig, NotifyError> {
        let _ = dotenv();
        Self::from_lookup(|key| var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<AppConfig, NotifyError> {
        let env = Lookup(&lookup);
        Ok(AppConfig {
            port: env.parse_or("PORT", 8080)?,
            scheme: env.string_or("SCHEME", "http"),
            host: env.string_or("HOST", "localhost"),
            log_json: env.string_or("LOG_FORMAT", "text").eq_ignore_ascii_case("json"),
            nats_url: env.string("NATS_URL"),
            jetstream_stream: env.string_or("JETSTREAM_STREAM", "NOTIFICATIONS"),
            jetstream_subject: env.string_or("JETSTREAM_SUBJECT", "notifications.tasks"),
            jetstream_durable: env.string_or("JETSTREAM_DURABLE", "notification-worker"),
            pull_batch: env.parse_or("JETSTREAM_PULL_BATCH", 10)?,
            worker_concurrency: env.parse_or("WORKER_CONCURRENCY", 8)?,
            queue_retry_base: env.secs_or("QUEUE_RETRY_BASE_SECS", Duration::from_secs(30))?,
            queue_retry_max: env.secs_or("QUEUE_RETRY_MAX_SECS", Duration::from_secs(600))?,
        })
    }
}

/// Settings every channel shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    pub enabled: bool,
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub timeout: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailConfig {
    pub settings: ChannelSettings,
    /// Used only when the sender's domain is not a known provider.
    pub smtp_host: String,
    pub smtp_port: Option<u16>,
    /// Defaults to the sender address when empty.
    pub smtp_username: String,
    pub smtp_password: String,
    pub use_tls: bool,
    pub from_address: String,
    pub from_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeishuConfig {
    pub settings: ChannelSettings,
    pub app_id: String,
    pub app_secret: String,
    pub webhook_base_url: String,
    pub webhook_token: String,
    /// Per group-chat webhook tokens, keyed by `oc_` chat id.
    pub group_webhooks: HashMap<String, String>,
    pub token_url: String,
    pub message_url: String,
    /// Link target for the card button; `{id}` is replaced by the work-order id.
    pub work_order_url: Option<String>,
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            settings: ChannelSettings::default(),
            app_id: String::new(),
            app_secret: String::new(),
            webhook_base_url: FEISHU_WEBHOOK_BASE_URL.to_string(),
            webhook_token: String::new(),
            group_webhooks: HashMap::new(),
            token_url: FEISHU_TOKEN_URL.to_string(),
            message_url: FEISHU_MESSAGE_URL.to_string(),
            work_order_url: None,
        }
    }
}

/// Per-channel notification settings. Built once and replaced wholesale on reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationConfig {
    pub email: EmailConfig,
    pub feishu: FeishuConfig,
}

impl NotificationConfig {
    pub fn from_env() -> Result<Self, NotifyError> {
        let _ = dotenv();
        Self::from_lookup(|key| var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, NotifyError> {
        let env = Lookup(&lookup);
        let email = EmailConfig {
            settings: env.channel_settings("EMAIL")?,
            smtp_host: env.string_or("EMAIL_SMTP_HOST", ""),
            smtp_port: env.parse("EMAIL_SMTP_PORT")?,
            smtp_username: env.string_or("EMAIL_SMTP_USERNAME", ""),
            smtp_password: env.string_or("EMAIL_SMTP_PASSWORD", ""),
            use_tls: env.bool_or("EMAIL_USE_TLS", true)?,
            from_address: env.string_or("EMAIL_FROM_ADDRESS", ""),
            from_name: env.string_or("EMAIL_FROM_NAME", "Work Order Notifications"),
        };

        let defaults = FeishuConfig::default();
        let feishu = FeishuConfig {
            settings: env.channel_settings("FEISHU")?,
            app_id: env.string_or("FEISHU_APP_ID", ""),
            app_secret: env.string_or("FEISHU_APP_SECRET", ""),
            webhook_base_url: env.string_or("FEISHU_WEBHOOK_BASE_URL", &defaults.webhook_base_url),
            webhook_token: env.string_or("FEISHU_WEBHOOK_TOKEN", ""),
            group_webhooks: parse_pairs(&env.string_or("FEISHU_GROUP_WEBHOOKS", "")),
            token_url: env.string_or("FEISHU_TOKEN_URL", &defaults.token_url),
            message_url: env.string_or("FEISHU_MESSAGE_URL", &defaults.message_url),
            work_order_url: env.string("FEISHU_WORK_ORDER_URL"),
        };

        Ok(Self { email, feishu })
    }

    pub fn settings(&self, kind: ChannelKind) -> &ChannelSettings {
        match kind {
            ChannelKind::Email => &self.email.settings,
            ChannelKind::Feishu => &self.feishu.settings,
        }
    }
}

/// Where the dispatch manager reads channel configuration from, at startup
/// and on every explicit reload.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<NotificationConfig, NotifyError>;
}

pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn load(&self) -> Result<NotificationConfig, NotifyError> {
        NotificationConfig::from_env()
    }
}

/// Fixed configuration, swappable at runtime. Used by tests and embedders
/// that manage configuration themselves.
pub struct StaticConfigSource {
    config: std::sync::RwLock<NotificationConfig>,
}

impl StaticConfigSource {
    pub fn new(config: NotificationConfig) -> Self {
        Self {
            config: std::sync::RwLock::new(config),
        }
    }

    pub fn replace(&self, config: NotificationConfig) {
        let mut guard = self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = config;
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<NotificationConfig, NotifyError> {
        let guard = self
            .config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.clone())
    }
}

struct Lookup<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Lookup<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.string(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, NotifyError> {
        self.string(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|_| NotifyError::Config(format!("{key} has an invalid value: {raw}")))
            })
            .transpose()
    }

    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, NotifyError> {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    fn bool_or(&self, key: &str, default: bool) -> Result<bool, NotifyError> {
        match self.string(key) {
            None => Ok(default),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(NotifyError::Config(format!("{key} is not a boolean: {raw}"))),
            },
        }
    }

    fn secs_or(&self, key: &str, default: Duration) -> Result<Duration, NotifyError> {
        Ok(self
            .parse::<u64>(key)?
            .map(Duration::from_secs)
            .unwrap_or(default))
    }

    fn channel_settings(&self, prefix: &str) -> Result<ChannelSettings, NotifyError> {
        Ok(ChannelSettings {
            enabled: self.bool_or(&format!("{prefix}_ENABLED"), false)?,
            max_retries: self.parse_or(&format!("{prefix}_MAX_RETRIES"), DEFAULT_MAX_RETRIES)?,
            retry_interval: self.secs_or(
                &format!("{prefix}_RETRY_INTERVAL_SECS"),
                DEFAULT_RETRY_INTERVAL,
            )?,
            timeout: self.secs_or(&format!("{prefix}_TIMEOUT_SECS"), DEFAULT_TIMEOUT)?,
        })
    }
}

/// Parses `a=1,b=2` into a map, skipping malformed entries.
fn parse_pairs(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .collect()
}
