//! Re-aggregates processed messages into acknowledgment batches.
//!
//! The batcher cycles through three states:
//! - collecting-first: blocked on the processed stream with nothing held;
//! - collecting-more: holding 1..max items, racing the next item against a
//!   deadline set when the first item arrived;
//! - flushing: handing the batch to a fresh acknowledger task, then going
//!   straight back to collecting-first.
//!
//! When the processed stream closes the batcher flushes whatever it holds and
//! stops. A batcher dropped mid-flight (aborted task) releases the
//! outstanding-work units of every message it still holds or that is still
//! buffered on the processed stream.

use crate::pipeline::acknowledger::Acknowledger;
use crate::pipeline::outstanding::OutstandingWork;
use crate::queue::Message;
use crate::runtime::telemetry::Telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

/// Why a batch left the batcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Reached the maximum batch size.
    Full,
    /// The batch timeout elapsed after its first item.
    Timeout,
    /// The processed stream closed while items were pending.
    Closed,
}

#[derive(Debug)]
pub(crate) struct FlushedBatch {
    pub(crate) messages: Vec<Message>,
    pub(crate) reason: FlushReason,
}

pub(crate) struct Batcher {
    processed: mpsc::Receiver<Message>,
    pending: Vec<Message>,
    outstanding: Arc<OutstandingWork>,
    max_batch_size: usize,
    batch_timeout: Duration,
}

impl Batcher {
    pub(crate) fn new(
        processed: mpsc::Receiver<Message>,
        outstanding: Arc<OutstandingWork>,
        max_batch_size: usize,
        batch_timeout: Duration,
    ) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            processed,
            pending: Vec::with_capacity(max_batch_size),
            outstanding,
            max_batch_size,
            batch_timeout,
        }
    }

    /// Collects the next batch. Returns `None` once the processed stream is
    /// closed and nothing is pending.
    pub(crate) async fn next_batch(&mut self) -> Option<FlushedBatch> {
        let first = self.processed.recv().await?;
        let deadline = Instant::now() + self.batch_timeout;

        self.pending.push(first);
        if self.pending.len() >= self.max_batch_size {
            return Some(self.flush(FlushReason::Full));
        }

        let timer = sleep_until(deadline);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                received = self.processed.recv() => match received {
                    Some(message) => {
                        self.pending.push(message);
                        if self.pending.len() >= self.max_batch_size {
                            return Some(self.flush(FlushReason::Full));
                        }
                    }
                    None => return Some(self.flush(FlushReason::Closed)),
                },
                _ = &mut timer => return Some(self.flush(FlushReason::Timeout)),
            }
        }
    }

    fn flush(&mut self, reason: FlushReason) -> FlushedBatch {
        let messages = std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.max_batch_size),
        );
        FlushedBatch { messages, reason }
    }

    pub(crate) fn spawn(
        self,
        acknowledger: Acknowledger,
        telemetry: Arc<Telemetry>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(acknowledger, telemetry))
    }

    #[tracing::instrument(name = "batcher", skip_all)]
    async fn run(mut self, acknowledger: Acknowledger, telemetry: Arc<Telemetry>) {
        tracing::info!(
            max_batch_size = self.max_batch_size,
            batch_timeout = ?self.batch_timeout,
            "batcher started"
        );

        while let Some(batch) = self.next_batch().await {
            telemetry.record_flush(batch.reason);
            tracing::debug!(size = batch.messages.len(), reason = ?batch.reason, "flushing batch");
            acknowledger.spawn(batch.messages);
        }

        tracing::info!("processed stream closed; batcher stopped");
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        // Handler tasks that finish later see a closed stream and release
        // their own unit.
        self.processed.close();
        let mut abandoned = self.pending.len();
        while self.processed.try_recv().is_ok() {
            abandoned += 1;
        }

        if abandoned > 0 {
            tracing::warn!(
                abandoned,
                "batcher dropped with unacknowledged messages; leaving them for redelivery"
            );
            self.outstanding.complete(abandoned);
        }
    }
}
