use crate::domain::models::{ChannelKind, SendRequest};
use crate::utils::is_valid_email;

/// Maps a recipient descriptor to the channel that should carry it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelResolver;

impl ChannelResolver {
    pub fn new() -> Self {
        Self
    }

    /// Whether the chosen channel is registered and enabled is the dispatch
    /// manager's concern.
    pub fn resolve(&self, request: &SendRequest) -> ChannelKind {
        Self::from_hint(&request.recipient_type)
            .unwrap_or_else(|| Self::from_address(&request.recipient_addr))
    }

    /// Explicit channel hints. Takes precedence over the address shape.
    pub fn from_hint(recipient_type: &str) -> Option<ChannelKind> {
        match recipient_type.trim().to_ascii_lowercase().as_str() {
            "email" | "user_email" | "mail" => Some(ChannelKind::Email),
            "feishu" | "lark" | "feishu_user" | "feishu_group" | "feishu_chat" | "chat_bot"
            | "chatbot" | "bot" => Some(ChannelKind::Feishu),
            _ => None,
        }
    }

    /// Infers the channel from the address shape: email shape wins, then
    /// Feishu-style ids (`oc_`, `ou_`, `on_` all start with `o`), else email.
    pub fn from_address(addr: &str) -> ChannelKind {
        let addr = addr.trim();
        if is_valid_email(addr) {
            ChannelKind::Email
        } else if addr.starts_with('o') {
            ChannelKind::Feishu
        } else {
            ChannelKind::Email
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(recipient_type: &str, addr: &str) -> SendRequest {
        SendRequest {
            recipient_type: recipient_type.into(),
            recipient_addr: addr.into(),
            ..Default::default()
        }
    }

    #[test]
    fn explicit_hints_take_precedence() {
        let resolver = ChannelResolver::new();
        assert_eq!(
            resolver.resolve(&request("feishu", "alice@example.com")),
            ChannelKind::Feishu
        );
        assert_eq!(
            resolver.resolve(&request("user_email", "oc_abc")),
            ChannelKind::Email
        );
        assert_eq!(
            resolver.resolve(&request(" EMAIL ", "x")),
            ChannelKind::Email
        );
    }

    #[test]
    fn email_shaped_addresses_route_to_email() {
        let resolver = ChannelResolver::new();
        for hint in ["", "auto", "user", "assignee"] {
            assert_eq!(
                resolver.resolve(&request(hint, "ops@example.com")),
                ChannelKind::Email,
                "hint {hint:?}"
            );
        }
    }

    #[test]
    fn feishu_ids_route_to_chat_bot() {
        let resolver = ChannelResolver::new();
        assert_eq!(
            resolver.resolve(&request("", "oc_abc123")),
            ChannelKind::Feishu
        );
        assert_eq!(
            resolver.resolve(&request("user", "ou_123")),
            ChannelKind::Feishu
        );
    }

    #[test]
    fn unknown_shapes_default_to_email() {
        assert_eq!(ChannelResolver::from_address("12345"), ChannelKind::Email);
    }

    #[test]
    fn raw_type_strings_fall_back_to_inference() {
        let resolver = ChannelResolver::new();
        assert_eq!(resolver.resolve(&request("group", "oc_1")), ChannelKind::Feishu);
        assert_eq!(resolver.resolve(&request("sms", "+15550100")), ChannelKind::Email);
    }
}
