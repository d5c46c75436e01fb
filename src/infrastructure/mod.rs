pub mod channels;
pub mod messaging;
