pub mod dispatch_manager;
pub mod task_handlers;

pub use dispatch_manager::{ChannelStats, DispatchManager, RetryPolicy};
pub use task_handlers::{QueueBackoff, TaskError, TaskHandler, TaskOutcome, TaskRouter};
