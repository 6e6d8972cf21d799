mod bytes;
mod priority;

pub use self::bytes::ByteQueue;
pub use priority::{Priority, PriorityFifo};
