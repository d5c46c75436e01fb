use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" | "normal" => Some(Priority::Medium),
            "high" | "urgent" => Some(Priority::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkOrderCreated,
    WorkOrderAssigned,
    WorkOrderApproved,
    WorkOrderRejected,
    WorkOrderEscalated,
    WorkOrderCompleted,
    WorkOrderCommented,
    WorkOrderOverdue,
    #[default]
    System,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WorkOrderCreated => "work_order_created",
            EventType::WorkOrderAssigned => "work_order_assigned",
            EventType::WorkOrderApproved => "work_order_approved",
            EventType::WorkOrderRejected => "work_order_rejected",
            EventType::WorkOrderEscalated => "work_order_escalated",
            EventType::WorkOrderCompleted => "work_order_completed",
            EventType::WorkOrderCommented => "work_order_commented",
            EventType::WorkOrderOverdue => "work_order_overdue",
            EventType::System => "system",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub data: Vec<u8>,
    pub content_type: String,
    pub size: u64,
}

impl Attachment {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            name: name.into(),
            data,
            content_type: content_type.into(),
            size,
        }
    }
}

/// A single outbound notification as handed over by the workflow engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendRequest {
    /// Assigned by the dispatch manager when empty.
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub priority: Priority,
    /// Channel hint (`email`, `feishu`, ...) or a raw type string to infer from.
    #[serde(default)]
    pub recipient_type: String,
    pub recipient_addr: String,
    #[serde(default)]
    pub recipient_name: String,
    #[serde(default)]
    pub work_order_id: Option<i64>,
    #[serde(default)]
    pub event_type: EventType,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub templates: HashMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl SendRequest {
    pub fn work_order_sn(&self) -> Option<String> {
        self.work_order_id.map(|id| format!("WO-{id}"))
    }
}
