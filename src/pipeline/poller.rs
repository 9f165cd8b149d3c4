use crate::pipeline::backoff;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::handler_task::panic_message;
use crate::pipeline::signal::Completion;
use crate::queue::{Message, MessageQueue};
use crate::runtime::telemetry::Telemetry;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Stop switch for a running [`Poller`].
#[derive(Debug, Clone)]
pub struct PollerHandle {
    keep_polling: Arc<AtomicBool>,
    wake: CancellationToken,
}

impl PollerHandle {
    /// Clears the keep-polling flag. Idempotent, and does not wait for the
    /// loop to exit: an in-progress receive still completes and its messages
    /// are still forwarded.
    pub fn stop(&self) {
        if self.keep_polling.swap(false, Ordering::SeqCst) {
            tracing::info!("poller stop requested");
        }
        self.wake.cancel();
    }

    pub fn is_polling(&self) -> bool {
        self.keep_polling.load(Ordering::SeqCst)
    }
}

/// Pulls messages from the queue onto the unprocessed stream.
pub(crate) struct Poller {
    queue: Arc<dyn MessageQueue>,
    unprocessed: mpsc::Sender<Message>,
    control: PollerHandle,
    finished: Completion,
    telemetry: Arc<Telemetry>,
    error_backoff: Duration,
}

impl Poller {
    pub(crate) fn new(
        queue: Arc<dyn MessageQueue>,
        unprocessed: mpsc::Sender<Message>,
        context: &PipelineContext,
        finished: Completion,
        error_backoff: Duration,
    ) -> Self {
        Self {
            queue,
            unprocessed,
            control: PollerHandle {
                keep_polling: context.keep_polling.clone(),
                wake: CancellationToken::new(),
            },
            finished,
            telemetry: context.telemetry.clone(),
            error_backoff,
        }
    }

    pub(crate) fn handle(&self) -> PollerHandle {
        self.control.clone()
    }

    /// Raises the keep-polling flag and starts the loop on its own task.
    ///
    /// The finished-polling event fires even if the loop panics, so shutdown
    /// never waits on a poller that is gone.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        self.control.keep_polling.store(true, Ordering::SeqCst);
        let finished = self.finished.clone();
        tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(self.run()).catch_unwind().await {
                tracing::error!(panic = %panic_message(panic.as_ref()), "poller task panicked");
            }
            finished.signal();
        })
    }

    #[tracing::instrument(name = "poller", skip_all)]
    async fn run(self) {
        let Poller {
            queue,
            unprocessed,
            control,
            finished,
            telemetry,
            error_backoff,
        } = self;

        tracing::info!("poller started");

        'poll: while control.is_polling() {
            tracing::trace!("receiving from queue");
            match queue.receive().await {
                Ok(messages) => {
                    if !messages.is_empty() {
                        telemetry.record_received(messages.len() as u64);
                        tracing::debug!(count = messages.len(), "received messages");
                    }
                    for message in messages {
                        if unprocessed.send(message).await.is_err() {
                            tracing::error!("unprocessed stream has no reader; stopping poller");
                            break 'poll;
                        }
                    }
                }
                Err(err) => {
                    telemetry.record_receive_error();
                    tracing::warn!(error = %err, "failed to receive messages; retrying");
                    backoff::pause(error_backoff, &control.wake).await;
                }
            }
        }

        drop(unprocessed);
        tracing::info!("finished polling; unprocessed stream closed");
        finished.signal();
    }
}
