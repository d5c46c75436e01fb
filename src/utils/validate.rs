//! Recipient address shape checks.

use std::sync::LazyLock;

use regex::Regex;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._%+-]{0,63}@(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,}$")
        .expect("email pattern compiles")
});

pub fn is_valid_email(addr: &str) -> bool {
    addr.len() <= 254 && EMAIL_RE.is_match(addr)
}

/// Receive-id flavours understood by the Feishu open platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeishuReceiveId {
    ChatId,
    OpenId,
    UnionId,
    Email,
    UserId,
}

impl FeishuReceiveId {
    pub fn classify(addr: &str) -> Self {
        if addr.starts_with("oc_") {
            FeishuReceiveId::ChatId
        } else if addr.starts_with("ou_") {
            FeishuReceiveId::OpenId
        } else if addr.starts_with("on_") {
            FeishuReceiveId::UnionId
        } else if is_valid_email(addr) {
            FeishuReceiveId::Email
        } else {
            FeishuReceiveId::UserId
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeishuReceiveId::ChatId => "chat_id",
            FeishuReceiveId::OpenId => "open_id",
            FeishuReceiveId::UnionId => "union_id",
            FeishuReceiveId::Email => "email",
            FeishuReceiveId::UserId => "user_id",
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, FeishuReceiveId::ChatId)
    }
}

/// The domain part of an address, lowercased.
pub fn email_domain(addr: &str) -> Option<String> {
    addr.rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_ascii_lowercase())
        .filter(|domain| !domain.is_empty())
}
