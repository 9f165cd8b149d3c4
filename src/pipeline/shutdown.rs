//! Ordered graceful shutdown.
//!
//! Each step waits for the previous one, which is what guarantees no message
//! is lost: the poller stops first, the dispatcher drains what the poller
//! already forwarded, every in-flight message finishes its handler and its
//! acknowledgment, and only then is the processed stream closed so the
//! batcher can exit.

use crate::pipeline::context::PipelineContext;
use crate::pipeline::poller::PollerHandle;
use crate::pipeline::signal::Completion;
use crate::queue::Message;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Progress of a pipeline through its shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShutdownPhase {
    Running,
    StoppingPoll,
    DrainingUnprocessed,
    WaitingOutstanding,
    ClosingProcessed,
    Done,
}

pub(crate) struct ShutdownCoordinator {
    context: PipelineContext,
    poller: PollerHandle,
    finished_polling: Completion,
    drained: Completion,
    processed: Option<mpsc::Sender<Message>>,
    phase: Arc<watch::Sender<ShutdownPhase>>,
    done: Completion,
}

pub(crate) struct ShutdownCoordinatorParams {
    pub(crate) context: PipelineContext,
    pub(crate) poller: PollerHandle,
    pub(crate) finished_polling: Completion,
    pub(crate) drained: Completion,
    pub(crate) processed: mpsc::Sender<Message>,
    pub(crate) phase: Arc<watch::Sender<ShutdownPhase>>,
    pub(crate) done: Completion,
}

impl ShutdownCoordinator {
    pub(crate) fn new(params: ShutdownCoordinatorParams) -> Self {
        let ShutdownCoordinatorParams {
            context,
            poller,
            finished_polling,
            drained,
            processed,
            phase,
            done,
        } = params;

        Self {
            context,
            poller,
            finished_polling,
            drained,
            processed: Some(processed),
            phase,
            done,
        }
    }

    /// Runs the shutdown sequence to completion.
    ///
    /// Every step is idempotent, so a sequence interrupted by dropping this
    /// future can be resumed by calling `run` again.
    #[tracing::instrument(name = "shutdown", skip_all)]
    pub(crate) async fn run(&mut self) {
        self.context.health.mark_unhealthy();
        tracing::info!("health flag cleared; starting graceful shutdown");

        self.enter(ShutdownPhase::StoppingPoll);
        self.poller.stop();
        self.finished_polling.wait().await;
        tracing::info!("poller finished");

        self.enter(ShutdownPhase::DrainingUnprocessed);
        self.drained.wait().await;
        tracing::info!("unprocessed stream drained");

        self.enter(ShutdownPhase::WaitingOutstanding);
        tracing::info!(
            outstanding = self.context.outstanding.current(),
            "waiting for in-flight messages to be acknowledged"
        );
        self.context.outstanding.wait_until_idle().await;
        tracing::info!("no outstanding work left");

        self.enter(ShutdownPhase::ClosingProcessed);
        if self.processed.take().is_some() {
            tracing::info!("processed stream closed");
        }

        self.enter(ShutdownPhase::Done);
        if self.done.signal() {
            tracing::info!("shutdown complete");
        }
    }

    fn enter(&self, phase: ShutdownPhase) {
        self.phase.send_if_modified(|current| {
            if *current == phase {
                false
            } else {
                tracing::debug!(from = ?*current, to = ?phase, "shutdown phase transition");
                *current = phase;
                true
            }
        });
    }
}
