pub mod channel;
pub mod message;
pub mod response;

pub use channel::ChannelKind;
pub use message::{Attachment, EventType, Priority, SendRequest};
pub use response::{SendResponse, SendStatus};
