use crate::queue::Message;
use anyhow::Error as AnyError;
use core::future::Future;
use core::pin::Pin;
use std::time::Duration;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'static>>;

/// Error returned by a [`MessageHandler`]. A failed message is never
/// acknowledged; it goes to [`MessageHandler::on_failure`] instead.
#[derive(Debug)]
pub struct HandlerError {
    source: AnyError,
}

impl HandlerError {
    pub fn new(source: AnyError) -> Self {
        Self { source }
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl From<AnyError> for HandlerError {
    fn from(source: AnyError) -> Self {
        Self::new(source)
    }
}

impl core::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "message handler failed: {}", self.source)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Processing logic applied to every received message.
pub trait MessageHandler: Send + Sync + 'static {
    /// Executed on a dedicated task per message. The returned future must own
    /// whatever it needs from `message`.
    fn handle(&self, message: &Message) -> HandlerFuture;

    /// Dead-letter hook for messages whose handler returned an error or
    /// panicked. The message is not acknowledged, so the queue redelivers it
    /// once its visibility timeout lapses.
    fn on_failure(&self, message: &Message, error: &HandlerError) {
        tracing::error!(
            receipt = message.receipt(),
            error = %error,
            "message handler failed; leaving message for redelivery"
        );
    }
}

/// Reference handler that stands in for real work by sleeping.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelayHandler {
    delay: Duration,
}

impl FixedDelayHandler {
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(3);

    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for FixedDelayHandler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DELAY)
    }
}

impl MessageHandler for FixedDelayHandler {
    fn handle(&self, message: &Message) -> HandlerFuture {
        let delay = self.delay;
        tracing::trace!(receipt = message.receipt(), ?delay, "handling message");
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(())
        })
    }
}
