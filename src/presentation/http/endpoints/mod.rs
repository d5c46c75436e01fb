pub mod channels;
pub mod health;
pub mod notifications;
pub mod root;

pub use channels::ChannelsEndpoints;
pub use health::HealthEndpoints;
pub use notifications::NotificationsEndpoints;
pub use root::{ApiState, EndpointsTags};
