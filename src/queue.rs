//! Queue transport seam: the message type, the `MessageQueue` capability the
//! pipeline consumes, and an in-process queue used for local runs and tests.

pub mod client;
pub mod memory;
pub mod message;

pub use client::{
    MessageQueue, QueueError, QueueFuture, QueueOperation, MAX_DELETE_BATCH_SIZE,
    MAX_RECEIVE_BATCH_SIZE,
};
pub use memory::InMemoryQueue;
pub use message::Message;
