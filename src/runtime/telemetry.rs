use crate::pipeline::batcher::FlushReason;
use crate::pipeline::outstanding::OutstandingWork;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters describing pipeline activity.
#[derive(Default, Debug)]
pub struct Telemetry {
    received: AtomicU64,
    receive_errors: AtomicU64,
    dispatched: AtomicU64,
    handler_failures: AtomicU64,
    batches_full: AtomicU64,
    batches_timed_out: AtomicU64,
    batches_closed: AtomicU64,
    acknowledged: AtomicU64,
    delete_failures: AtomicU64,
}

impl Telemetry {
    pub fn record_received(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, reason: FlushReason) {
        let counter = match reason {
            FlushReason::Full => &self.batches_full,
            FlushReason::Timeout => &self.batches_timed_out,
            FlushReason::Closed => &self.batches_closed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acknowledged(&self, count: u64) {
        self.acknowledged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_delete_failure(&self) {
        self.delete_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            received: self.received.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            batches_full: self.batches_full.load(Ordering::Relaxed),
            batches_timed_out: self.batches_timed_out.load(Ordering::Relaxed),
            batches_closed: self.batches_closed.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            delete_failures: self.delete_failures.load(Ordering::Relaxed),
        }
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::Relaxed)
    }

    pub fn delete_failures(&self) -> u64 {
        self.delete_failures.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub received: u64,
    pub receive_errors: u64,
    pub dispatched: u64,
    pub handler_failures: u64,
    pub batches_full: u64,
    pub batches_timed_out: u64,
    pub batches_closed: u64,
    pub acknowledged: u64,
    pub delete_failures: u64,
}

impl TelemetrySnapshot {
    pub fn batches_flushed(&self) -> u64 {
        self.batches_full + self.batches_timed_out + self.batches_closed
    }
}

/// Spawns a background task that periodically logs throughput, outstanding work, and failures.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    outstanding: Arc<OutstandingWork>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "queue_worker::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let acknowledged_delta = current_snapshot
                        .acknowledged
                        .saturating_sub(last_snapshot.acknowledged);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        acknowledged_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "queue_worker::metrics",
                        throughput = format!("{throughput:.2}"),
                        received = current_snapshot.received,
                        acknowledged = current_snapshot.acknowledged,
                        outstanding = outstanding.current(),
                        batches = current_snapshot.batches_flushed(),
                        receive_errors = current_snapshot.receive_errors,
                        handler_failures = current_snapshot.handler_failures,
                        delete_failures = current_snapshot.delete_failures,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
