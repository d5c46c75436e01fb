//! Human-facing labels for priorities and event types.

use crate::domain::models::{EventType, Priority};

pub fn priority_text(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "High",
        Priority::Medium => "Medium",
        Priority::Low => "Low",
    }
}

pub fn priority_icon(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "\u{1f534}",   // 🔴
        Priority::Medium => "\u{1f7e1}", // 🟡
        Priority::Low => "\u{1f7e2}",    // 🟢
    }
}

/// Badge colour used in HTML mail.
pub fn priority_color(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "#e74c3c",
        Priority::Medium => "#f39c12",
        Priority::Low => "#27ae60",
    }
}

/// Feishu card header template name.
pub fn priority_card_template(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "red",
        Priority::Medium => "orange",
        Priority::Low => "green",
    }
}

pub fn event_text(event: EventType) -> &'static str {
    match event {
        EventType::WorkOrderCreated => "Work order created",
        EventType::WorkOrderAssigned => "Work order assigned",
        EventType::WorkOrderApproved => "Work order approved",
        EventType::WorkOrderRejected => "Work order rejected",
        EventType::WorkOrderEscalated => "Work order escalated",
        EventType::WorkOrderCompleted => "Work order completed",
        EventType::WorkOrderCommented => "New comment",
        EventType::WorkOrderOverdue => "Work order overdue",
        EventType::System => "System notification",
    }
}

pub fn event_icon(event: EventType) -> &'static str {
    match event {
        EventType::WorkOrderCreated => "\u{1f4dd}",   // 📝
        EventType::WorkOrderAssigned => "\u{1f464}",  // 👤
        EventType::WorkOrderApproved => "\u{2705}",   // ✅
        EventType::WorkOrderRejected => "\u{274c}",   // ❌
        EventType::WorkOrderEscalated => "\u{23eb}",  // ⏫
        EventType::WorkOrderCompleted => "\u{1f389}", // 🎉
        EventType::WorkOrderCommented => "\u{1f4ac}", // 💬
        EventType::WorkOrderOverdue => "\u{23f0}",    // ⏰
        EventType::System => "\u{1f514}",             // 🔔
    }
}
