use std::sync::Arc;
use tokio::sync::watch;

/// Broadcast-once completion event.
///
/// Signalled at most once; every waiter, including ones that start waiting
/// after the fact, observes the completion.
#[derive(Debug, Clone)]
pub struct Completion {
    tx: Arc<watch::Sender<bool>>,
}

impl Completion {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Marks the event complete. Returns `true` only for the call that
    /// actually completed it.
    pub fn signal(&self) -> bool {
        self.tx.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        })
    }

    pub fn is_complete(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}
