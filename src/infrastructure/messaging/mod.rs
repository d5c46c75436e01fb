pub mod in_memory;
pub mod jetstream;

pub use in_memory::{InMemoryTaskQueue, InMemoryWorker};
pub use jetstream::{JetstreamConfig, JetstreamTaskQueue, JetstreamWorker};
