use crate::pipeline::outstanding::OutstandingWork;
use crate::queue::Message;
use crate::runtime::handler::{HandlerError, MessageHandler};
use crate::runtime::telemetry::Telemetry;
use anyhow::anyhow;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit};

/// Processing of a single message, from handler invocation to hand-off on
/// the processed stream.
pub(crate) struct HandlerTask<H: MessageHandler> {
    pub(crate) message: Message,
    pub(crate) handler: Arc<H>,
    pub(crate) processed: mpsc::Sender<Message>,
    pub(crate) outstanding: Arc<OutstandingWork>,
    pub(crate) telemetry: Arc<Telemetry>,
    pub(crate) permit: Option<OwnedSemaphorePermit>,
}

impl<H: MessageHandler> HandlerTask<H> {
    /// Runs the handler and forwards the message for acknowledgment.
    ///
    /// A message whose handler fails or panics goes to the dead-letter hook
    /// and releases its outstanding-work unit here, because it will never
    /// reach an acknowledger.
    pub(crate) async fn run(self) {
        let HandlerTask {
            message,
            handler,
            processed,
            outstanding,
            telemetry,
            permit,
        } = self;

        let outcome = AssertUnwindSafe(async { handler.handle(&message).await })
            .catch_unwind()
            .await;
        drop(permit);
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(panic) => Some(HandlerError::new(anyhow!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        match failure {
            None => {
                tracing::trace!(receipt = message.receipt(), "message processed");
                if let Err(err) = processed.send(message).await {
                    tracing::error!(
                        receipt = err.0.receipt(),
                        "processed stream closed before the message could be batched"
                    );
                    outstanding.complete(1);
                }
            }
            Some(err) => {
                let _release = outstanding.release_on_drop(1);
                telemetry.record_handler_failure();
                let hook = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    handler.on_failure(&message, &err)
                }));
                if let Err(panic) = hook {
                    tracing::error!(
                        receipt = message.receipt(),
                        panic = %panic_message(panic.as_ref()),
                        "dead-letter hook panicked"
                    );
                }
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
