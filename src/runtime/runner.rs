use crate::pipeline::service::Service;
use crate::queue::MessageQueue;
use crate::runtime::config::WorkerConfig;
use crate::runtime::handler::MessageHandler;
use crate::runtime::health::Health;
use anyhow::{anyhow, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Drives a [`Service`] from process start to a completed graceful shutdown,
/// reacting to OS interrupts.
pub struct Runner<H: MessageHandler> {
    service: Service<H>,
    shutdown: CancellationToken,
}

impl<H: MessageHandler> Runner<H> {
    pub fn new(config: WorkerConfig, queue: Arc<dyn MessageQueue>, handler: H) -> Self {
        Self {
            service: Service::new(config, queue, handler),
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn service(&self) -> &Service<H> {
        &self.service
    }

    pub fn health(&self) -> Arc<Health> {
        self.service.health()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.service.is_running() {
            return Ok(());
        }
        self.service.start()
    }

    /// Stops the pipeline gracefully, waiting for every in-flight message.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.service.is_running() {
            return Ok(());
        }

        self.shutdown.cancel();
        let result = self.service.shutdown().await;
        self.reinitialize_shutdown_token();
        result
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled elsewhere,
    /// then performs the graceful shutdown. A second Ctrl-C during shutdown aborts it.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.run_until_interrupted(|| async {
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for Ctrl-C; waiting for token cancellation only");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Same as [`Self::run_until_ctrl_c`] with a caller-supplied interrupt source.
    ///
    /// `interrupt` is called once to await the signal that starts shutdown and once more
    /// to await the signal that forces it.
    pub async fn run_until_interrupted<F, Fut>(&mut self, mut interrupt: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        self.start()?;
        tracing::info!("runner started; waiting for an interrupt to initiate shutdown");

        tokio::select! {
            _ = interrupt() => {
                tracing::info!("interrupt received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }
        self.shutdown.cancel();

        let forced_interrupt = interrupt();
        let outcome = tokio::select! {
            result = self.service.shutdown() => Some(result),
            _ = forced_interrupt => None,
        };

        let result = match outcome {
            Some(result) => result,
            None => {
                tracing::warn!("second interrupt received; forcing shutdown");
                self.service.abort();
                Err(anyhow!("shutdown forced by repeated interrupt"))
            }
        };

        self.reinitialize_shutdown_token();
        result
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
    }
}
