pub mod retry_notification;
pub mod schedule_notification;

pub use retry_notification::{RetryNotificationRequest, RetryNotificationUseCase};
pub use schedule_notification::{ScheduleNotificationRequest, ScheduleNotificationUseCase};
