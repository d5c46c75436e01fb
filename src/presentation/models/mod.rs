use poem_openapi::Enum;

use crate::domain::{
    events::Recurrence,
    models::{EventType, Priority, SendStatus},
};

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum PriorityKind {
    #[oai(rename = "low")]
    Low,
    #[default]
    #[oai(rename = "medium")]
    Medium,
    #[oai(rename = "high")]
    High,
}

impl From<PriorityKind> for Priority {
    fn from(value: PriorityKind) -> Self {
        match value {
            PriorityKind::Low => Priority::Low,
            PriorityKind::Medium => Priority::Medium,
            PriorityKind::High => Priority::High,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum EventKind {
    #[oai(rename = "work_order_created")]
    WorkOrderCreated,
    #[oai(rename = "work_order_assigned")]
    WorkOrderAssigned,
    #[oai(rename = "work_order_approved")]
    WorkOrderApproved,
    #[oai(rename = "work_order_rejected")]
    WorkOrderRejected,
    #[oai(rename = "work_order_escalated")]
    WorkOrderEscalated,
    #[oai(rename = "work_order_completed")]
    WorkOrderCompleted,
    #[oai(rename = "work_order_commented")]
    WorkOrderCommented,
    #[oai(rename = "work_order_overdue")]
    WorkOrderOverdue,
    #[default]
    #[oai(rename = "system")]
    System,
}

impl From<EventKind> for EventType {
    fn from(value: EventKind) -> Self {
        match value {
            EventKind::WorkOrderCreated => EventType::WorkOrderCreated,
            EventKind::WorkOrderAssigned => EventType::WorkOrderAssigned,
            EventKind::WorkOrderApproved => EventType::WorkOrderApproved,
            EventKind::WorkOrderRejected => EventType::WorkOrderRejected,
            EventKind::WorkOrderEscalated => EventType::WorkOrderEscalated,
            EventKind::WorkOrderCompleted => EventType::WorkOrderCompleted,
            EventKind::WorkOrderCommented => EventType::WorkOrderCommented,
            EventKind::WorkOrderOverdue => EventType::WorkOrderOverdue,
            EventKind::System => EventType::System,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum SendStatusKind {
    #[oai(rename = "sent")]
    Sent,
    #[oai(rename = "failed")]
    Failed,
    #[oai(rename = "cancelled")]
    Cancelled,
}

impl From<SendStatus> for SendStatusKind {
    fn from(value: SendStatus) -> Self {
        match value {
            SendStatus::Sent => SendStatusKind::Sent,
            SendStatus::Failed => SendStatusKind::Failed,
            SendStatus::Cancelled => SendStatusKind::Cancelled,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum RecurrenceKind {
    #[oai(rename = "hourly")]
    Hourly,
    #[oai(rename = "daily")]
    Daily,
    #[oai(rename = "weekly")]
    Weekly,
}

impl From<RecurrenceKind> for Recurrence {
    fn from(value: RecurrenceKind) -> Self {
        match value {
            RecurrenceKind::Hourly => Recurrence::Hourly,
            RecurrenceKind::Daily => Recurrence::Daily,
            RecurrenceKind::Weekly => Recurrence::Weekly,
        }
    }
}
