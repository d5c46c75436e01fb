//! Placeholder substitution for notification subjects and bodies.
//!
//! Five spellings resolve the same variable: `${name}`, `{{name}}`,
//! `{{ name }}`, `{name}` and `{ name }`. Matching is a single left-to-right
//! pass in which the longer delimiters win at any position, so `{{x}}` is never
//! consumed as `{` + `{x}` + `}`. Substituted values are not rescanned, and
//! unknown names are left exactly as written.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Local, Utc};
use regex::{Captures, Regex};
use serde_json::Value;

use crate::domain::models::SendRequest;
use crate::utils::format::{event_icon, event_text, priority_icon, priority_text};

pub const PLATFORM_NAME: &str = "Work Order Platform";
pub const SYSTEM_NAME: &str = "Notification Center";
pub const SYSTEM_NOTICE: &str = "System Notice";

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\$\{[ ]*([A-Za-z0-9_.\-]+)[ ]*\}|\{\{[ ]*([A-Za-z0-9_.\-]+)[ ]*\}\}|\{[ ]*([A-Za-z0-9_.\-]+)[ ]*\}",
    )
    .expect("placeholder pattern compiles")
});

pub fn render_template(content: &str, request: &SendRequest) -> String {
    render_template_at(content, request, Utc::now())
}

/// Same as [`render_template`] with the clock pinned, for deterministic output.
pub fn render_template_at(content: &str, request: &SendRequest, now: DateTime<Utc>) -> String {
    let variables = build_variables(request, now);
    substitute(content, &variables)
}

pub fn substitute(content: &str, variables: &HashMap<String, String>) -> String {
    if !content.contains('{') {
        return content.to_string();
    }

    PLACEHOLDER_RE
        .replace_all(content, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match variables.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Built-in fields, overlaid by `templates`, overlaid by `metadata`.
pub fn build_variables(request: &SendRequest, now: DateTime<Utc>) -> HashMap<String, String> {
    let local = now.with_timezone(&Local);
    let mut vars = HashMap::new();

    let mut set = |key: &str, value: String| {
        vars.insert(key.to_string(), value);
    };

    set("subject", request.subject.clone());
    set("content", request.content.clone());
    set("recipient_name", request.recipient_name.clone());
    set("recipient_addr", request.recipient_addr.clone());
    set("recipient_address", request.recipient_addr.clone());
    set("message_id", request.message_id.clone());
    set(
        "work_order_sn",
        request
            .work_order_sn()
            .unwrap_or_else(|| SYSTEM_NOTICE.to_string()),
    );
    set(
        "work_order_id",
        request
            .work_order_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
    );
    set("priority", request.priority.as_str().to_string());
    set("priority_level", request.priority.as_str().to_string());
    set("priority_text", priority_text(request.priority).to_string());
    set("priority_icon", priority_icon(request.priority).to_string());
    set("event_type", request.event_type.as_str().to_string());
    set("event_text", event_text(request.event_type).to_string());
    set("event_icon", event_icon(request.event_type).to_string());
    set("current_time", local.format("%Y-%m-%d %H:%M:%S").to_string());
    set("current_date", local.format("%Y-%m-%d").to_string());
    set("year", local.format("%Y").to_string());
    set("month", local.format("%m").to_string());
    set("day", local.format("%d").to_string());
    set("hour", local.format("%H").to_string());
    set("minute", local.format("%M").to_string());
    set("platform_name", PLATFORM_NAME.to_string());
    set("system_name", SYSTEM_NAME.to_string());

    for (key, value) in &request.templates {
        vars.insert(key.clone(), value.clone());
    }
    for (key, value) in &request.metadata {
        vars.insert(key.clone(), stringify(value));
    }

    vars
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
