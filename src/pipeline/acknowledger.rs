use crate::pipeline::context::PipelineContext;
use crate::pipeline::outstanding::OutstandingWork;
use crate::queue::{Message, MessageQueue};
use crate::runtime::telemetry::Telemetry;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Deletes flushed batches from the source queue.
///
/// Each batch gets exactly one delete attempt. Whatever the outcome, the
/// batch's outstanding-work units are released, so a failing queue cannot
/// stall shutdown; undeleted messages come back through the queue's own
/// visibility timeout.
#[derive(Clone)]
pub(crate) struct Acknowledger {
    queue: Arc<dyn MessageQueue>,
    outstanding: Arc<OutstandingWork>,
    telemetry: Arc<Telemetry>,
}

impl Acknowledger {
    pub(crate) fn new(queue: Arc<dyn MessageQueue>, context: &PipelineContext) -> Self {
        Self {
            queue,
            outstanding: context.outstanding.clone(),
            telemetry: context.telemetry.clone(),
        }
    }

    pub(crate) fn spawn(&self, batch: Vec<Message>) -> JoinHandle<()> {
        let acknowledger = self.clone();
        tokio::spawn(async move { acknowledger.acknowledge(batch).await })
    }

    pub(crate) async fn acknowledge(&self, batch: Vec<Message>) {
        let size = batch.len();
        let _release = self.outstanding.release_on_drop(size);

        match self.queue.delete(&batch).await {
            Ok(()) => {
                self.telemetry.record_acknowledged(size as u64);
                tracing::debug!(size, "acknowledged batch");
            }
            Err(err) => {
                self.telemetry.record_delete_failure();
                tracing::error!(
                    size,
                    error = %err,
                    "failed to delete batch; messages return after their visibility timeout"
                );
            }
        }
    }
}
