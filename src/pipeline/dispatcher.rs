use crate::pipeline::context::PipelineContext;
use crate::pipeline::handler_task::{panic_message, HandlerTask};
use crate::pipeline::outstanding::OutstandingWork;
use crate::pipeline::signal::Completion;
use crate::queue::Message;
use crate::runtime::handler::MessageHandler;
use crate::runtime::telemetry::Telemetry;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

/// Fans messages from the unprocessed stream out to one handler task each.
pub(crate) struct Dispatcher<H: MessageHandler> {
    unprocessed: mpsc::Receiver<Message>,
    processed: mpsc::Sender<Message>,
    handler: Arc<H>,
    outstanding: Arc<OutstandingWork>,
    telemetry: Arc<Telemetry>,
    limit: Option<Arc<Semaphore>>,
    drained: Completion,
}

impl<H: MessageHandler> Dispatcher<H> {
    pub(crate) fn new(
        unprocessed: mpsc::Receiver<Message>,
        processed: mpsc::Sender<Message>,
        handler: Arc<H>,
        context: &PipelineContext,
        max_concurrent_handlers: Option<usize>,
        drained: Completion,
    ) -> Self {
        Self {
            unprocessed,
            processed,
            handler,
            outstanding: context.outstanding.clone(),
            telemetry: context.telemetry.clone(),
            limit: max_concurrent_handlers.map(|limit| Arc::new(Semaphore::new(limit))),
            drained,
        }
    }

    /// Starts the dispatch loop on its own task. The drained event fires even
    /// if the loop panics.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        let drained = self.drained.clone();
        tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(self.run()).catch_unwind().await {
                tracing::error!(panic = %panic_message(panic.as_ref()), "dispatcher task panicked");
            }
            drained.signal();
        })
    }

    #[tracing::instrument(name = "dispatcher", skip_all)]
    async fn run(self) {
        let Dispatcher {
            mut unprocessed,
            processed,
            handler,
            outstanding,
            telemetry,
            limit,
            drained,
        } = self;

        tracing::info!(bounded = limit.is_some(), "dispatcher started");

        while let Some(message) = unprocessed.recv().await {
            // The semaphore is never closed, so acquisition only waits.
            let permit = match &limit {
                Some(limit) => limit.clone().acquire_owned().await.ok(),
                None => None,
            };

            outstanding.begin();
            telemetry.record_dispatched();
            tracing::trace!(receipt = message.receipt(), "dispatching message");

            let task = HandlerTask {
                message,
                handler: handler.clone(),
                processed: processed.clone(),
                outstanding: outstanding.clone(),
                telemetry: telemetry.clone(),
                permit,
            };
            tokio::spawn(task.run());
        }

        drop(processed);
        tracing::info!("drained unprocessed stream; no more new messages coming in");
        drained.signal();
    }
}
