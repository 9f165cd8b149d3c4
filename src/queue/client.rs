use crate::queue::message::Message;
use anyhow::Error as AnyError;
use core::future::Future;
use core::pin::Pin;

/// Largest batch a single `delete` call accepts.
pub const MAX_DELETE_BATCH_SIZE: usize = 10;

/// Largest number of messages a single `receive` call hands back.
pub const MAX_RECEIVE_BATCH_SIZE: usize = 10;

pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Queue call that produced a [`QueueError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOperation {
    Receive,
    Delete,
}

/// Error surfaced by a [`MessageQueue`] implementation.
///
/// The pipeline never propagates these: receive failures are retried and
/// delete failures are left to the queue's redelivery.
#[derive(Debug)]
pub struct QueueError {
    operation: QueueOperation,
    source: AnyError,
}

impl QueueError {
    pub fn new(operation: QueueOperation, source: AnyError) -> Self {
        Self { operation, source }
    }

    pub fn receive(source: AnyError) -> Self {
        Self::new(QueueOperation::Receive, source)
    }

    pub fn delete(source: AnyError) -> Self {
        Self::new(QueueOperation::Delete, source)
    }

    pub fn operation(&self) -> QueueOperation {
        self.operation
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl core::fmt::Display for QueueError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let operation = match self.operation {
            QueueOperation::Receive => "receive",
            QueueOperation::Delete => "delete",
        };
        write!(f, "queue {operation} failed: {}", self.source)
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Capability the pipeline consumes from the external queue.
///
/// Both calls may block for a long time (long polling, slow networks); the
/// pipeline applies no timeout to either.
pub trait MessageQueue: Send + Sync + 'static {
    /// Returns zero or more messages. An empty result is not an error.
    fn receive(&self) -> QueueFuture<'_, Vec<Message>>;

    /// Acknowledges every message in `batch` in one all-or-nothing request
    /// keyed by receipt. `batch` never holds more than
    /// [`MAX_DELETE_BATCH_SIZE`] messages.
    fn delete<'a>(&'a self, batch: &'a [Message]) -> QueueFuture<'a, ()>;
}
