use crate::pipeline::outstanding::OutstandingWork;
use crate::runtime::health::Health;
use crate::runtime::telemetry::Telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State shared by every stage of one pipeline instance.
///
/// The flags and the counter are the only values mutated from several tasks.
/// Each `Service` owns its own context, so independent pipelines never
/// observe each other.
#[derive(Debug)]
pub struct PipelineContext {
    pub(crate) health: Arc<Health>,
    pub(crate) keep_polling: Arc<AtomicBool>,
    pub(crate) outstanding: Arc<OutstandingWork>,
    pub(crate) telemetry: Arc<Telemetry>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self {
            health: Arc::new(Health::default()),
            keep_polling: Arc::new(AtomicBool::new(false)),
            outstanding: Arc::new(OutstandingWork::new()),
            telemetry: Arc::new(Telemetry::default()),
        }
    }

    pub fn health(&self) -> Arc<Health> {
        self.health.clone()
    }

    pub fn outstanding(&self) -> Arc<OutstandingWork> {
        self.outstanding.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.keep_polling.load(Ordering::SeqCst)
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for PipelineContext {
    fn clone(&self) -> Self {
        Self {
            health: Arc::clone(&self.health),
            keep_polling: Arc::clone(&self.keep_polling),
            outstanding: Arc::clone(&self.outstanding),
            telemetry: Arc::clone(&self.telemetry),
        }
    }
}
