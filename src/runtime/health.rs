use std::sync::atomic::{AtomicBool, Ordering};

/// Liveness flag exposed to external health probes.
///
/// Healthy while the pipeline runs; cleared the moment shutdown begins.
#[derive(Debug, Default)]
pub struct Health {
    healthy: AtomicBool,
}

impl Health {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_healthy(&self) {
        self.healthy.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::SeqCst);
    }
}
