//! Pipeline orchestration.
//!
//! `Service` owns one pipeline instance and wires its stages together:
//! - `poller` pulls from the queue onto the unprocessed stream;
//! - `dispatcher` starts one handler task per message;
//! - `batcher` regroups processed messages and hands each batch to an
//!   `acknowledger`;
//! - `shutdown` sequences the graceful stop.
//!
//! A service can be started again after a completed shutdown.

use crate::pipeline::acknowledger::Acknowledger;
use crate::pipeline::batcher::Batcher;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::dispatcher::Dispatcher;
use crate::pipeline::outstanding::OutstandingWork;
use crate::pipeline::poller::{Poller, PollerHandle};
use crate::pipeline::shutdown::{ShutdownCoordinator, ShutdownCoordinatorParams, ShutdownPhase};
use crate::pipeline::signal::Completion;
use crate::queue::{Message, MessageQueue};
use crate::runtime::config::WorkerConfig;
use crate::runtime::handler::MessageHandler;
use crate::runtime::health::Health;
use crate::runtime::telemetry::{self, Telemetry};
use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

pub struct Service<H: MessageHandler> {
    config: WorkerConfig,
    queue: Arc<dyn MessageQueue>,
    handler: Arc<H>,
    context: PipelineContext,
    phase: Arc<watch::Sender<ShutdownPhase>>,
    completed: Completion,
    running: Option<RunningPipeline>,
}

struct RunningPipeline {
    coordinator: ShutdownCoordinator,
    poller: PollerHandle,
    stages: Vec<(&'static str, JoinHandle<()>)>,
    abort_handles: Vec<AbortHandle>,
    metrics_token: CancellationToken,
}

impl<H: MessageHandler> Service<H> {
    pub fn new(config: WorkerConfig, queue: Arc<dyn MessageQueue>, handler: H) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Done);
        Self {
            config,
            queue,
            handler: Arc::new(handler),
            context: PipelineContext::new(),
            phase: Arc::new(phase),
            completed: Completion::new(),
            running: None,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn health(&self) -> Arc<Health> {
        self.context.health()
    }

    pub fn outstanding(&self) -> Arc<OutstandingWork> {
        self.context.outstanding()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.context.telemetry()
    }

    /// Current shutdown phase. `Done` before the first start.
    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Subscribes to shutdown phase transitions.
    pub fn watch_phase(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase.subscribe()
    }

    /// Completion event of the current (or last) run's shutdown sequence.
    pub fn completion(&self) -> Completion {
        self.completed.clone()
    }

    /// Stop switch for the running poller, if any.
    pub fn poller(&self) -> Option<PollerHandle> {
        self.running.as_ref().map(|running| running.poller.clone())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Starts every pipeline stage and raises the health flag.
    ///
    /// Returns an error if the service is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            bail!("service already running");
        }

        debug_assert!(
            self.config.validate().is_ok(),
            "WorkerConfig should have been validated at construction time"
        );

        let outstanding = self.context.outstanding.current();
        if outstanding != 0 {
            bail!("cannot start with {outstanding} messages still outstanding");
        }

        tracing::info!(
            queue = self.config.queue_url(),
            max_batch_size = self.config.max_batch_size(),
            batch_timeout = ?self.config.batch_timeout(),
            max_concurrent_handlers = ?self.config.max_concurrent_handlers(),
            "starting queue worker"
        );

        let capacity = self.config.channel_capacity();
        let (unprocessed_tx, unprocessed_rx) = mpsc::channel::<Message>(capacity);
        let (processed_tx, processed_rx) = mpsc::channel::<Message>(capacity);

        let finished_polling = Completion::new();
        let drained = Completion::new();
        self.completed = Completion::new();
        self.phase.send_replace(ShutdownPhase::Running);

        let poller = Poller::new(
            self.queue.clone(),
            unprocessed_tx,
            &self.context,
            finished_polling.clone(),
            self.config.receive_error_backoff(),
        );
        let poller_handle = poller.handle();

        let dispatcher = Dispatcher::new(
            unprocessed_rx,
            processed_tx.clone(),
            self.handler.clone(),
            &self.context,
            self.config.max_concurrent_handlers(),
            drained.clone(),
        );

        let batcher = Batcher::new(
            processed_rx,
            self.context.outstanding.clone(),
            self.config.max_batch_size(),
            self.config.batch_timeout(),
        );
        let acknowledger = Acknowledger::new(self.queue.clone(), &self.context);

        let metrics_token = CancellationToken::new();
        let stages = vec![
            ("poller", poller.spawn()),
            ("dispatcher", dispatcher.spawn()),
            (
                "batcher",
                batcher.spawn(acknowledger, self.context.telemetry.clone()),
            ),
            (
                "metrics reporter",
                telemetry::spawn_metrics_reporter(
                    self.context.telemetry.clone(),
                    self.context.outstanding.clone(),
                    metrics_token.clone(),
                    self.config.metrics_interval(),
                ),
            ),
        ];
        let abort_handles = stages
            .iter()
            .map(|(_, handle)| handle.abort_handle())
            .collect();

        let coordinator = ShutdownCoordinator::new(ShutdownCoordinatorParams {
            context: self.context.clone(),
            poller: poller_handle.clone(),
            finished_polling,
            drained,
            processed: processed_tx,
            phase: self.phase.clone(),
            done: self.completed.clone(),
        });

        self.running = Some(RunningPipeline {
            coordinator,
            poller: poller_handle,
            stages,
            abort_handles,
            metrics_token,
        });
        self.context.health.mark_healthy();

        Ok(())
    }

    /// Runs the graceful shutdown sequence and joins every stage task.
    ///
    /// Returns once all in-flight messages were handled and acknowledged (or
    /// failed acknowledgment). Calling it on a stopped service is a no-op.
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(running) = self.running.as_mut() else {
            return Ok(());
        };

        tracing::info!("stopping queue worker");
        running.coordinator.run().await;
        running.metrics_token.cancel();

        let mut panicked = Vec::new();
        for (stage, handle) in std::mem::take(&mut running.stages) {
            if let Err(err) = handle.await {
                tracing::warn!(stage, error = %err, "pipeline task terminated unexpectedly");
                panicked.push(stage);
            }
        }
        self.running = None;

        if !panicked.is_empty() {
            bail!("pipeline tasks failed during shutdown: {}", panicked.join(", "));
        }

        tracing::info!(
            acknowledged = self.context.telemetry.acknowledged(),
            "queue worker stopped"
        );
        Ok(())
    }

    /// Tears the pipeline down without waiting for in-flight work.
    ///
    /// Handler and acknowledgment tasks already spawned are left to finish on
    /// their own; their messages are redelivered by the queue if they never
    /// get deleted. Messages the batcher held are released from the
    /// outstanding-work counter when its task is torn down, so the service
    /// can be started again once the remaining handlers finish.
    pub fn abort(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        tracing::warn!(
            outstanding = self.context.outstanding.current(),
            "aborting pipeline without waiting for in-flight messages"
        );
        self.context.health.mark_unhealthy();
        running.poller.stop();
        running.metrics_token.cancel();
        for handle in &running.abort_handles {
            handle.abort();
        }
    }
}
