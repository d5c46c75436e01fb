pub mod channel;
pub mod resolver;
pub mod task_queue;
pub mod template;

pub use channel::{ChannelFactory, NotificationChannel};
pub use resolver::ChannelResolver;
pub use task_queue::{EnqueueInfo, EnqueueOptions, QueuedTask, TaskQueue};
pub use template::{render_template, render_template_at};
