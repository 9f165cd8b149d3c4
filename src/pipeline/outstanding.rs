use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Counts messages that were dispatched but not yet acknowledged.
///
/// Incremented once per message when its handler task starts and decremented
/// once per message when its batch acknowledgment finishes, whether or not
/// the delete succeeded. Never goes below zero.
#[derive(Debug, Default)]
pub struct OutstandingWork {
    count: AtomicUsize,
    notify: Notify,
}

impl OutstandingWork {
    pub fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub(crate) fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Releases `count` units of work and returns what remains outstanding.
    pub(crate) fn complete(&self, count: usize) -> usize {
        if count == 0 {
            return self.current();
        }

        match self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(count)
            }) {
            Ok(previous) => {
                let remaining = previous - count;
                if remaining == 0 {
                    self.notify.notify_waiters();
                }
                remaining
            }
            Err(current) => {
                tracing::error!(
                    current,
                    requested = count,
                    "outstanding work released more than was dispatched"
                );
                current
            }
        }
    }

    /// Returns a guard that releases `count` units when dropped, including
    /// during a panic unwind.
    pub(crate) fn release_on_drop(self: &Arc<Self>, count: usize) -> OutstandingGuard {
        OutstandingGuard {
            work: Arc::clone(self),
            count,
        }
    }

    /// Resolves once no work is outstanding.
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.notify.notified();
            if self.current() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub(crate) struct OutstandingGuard {
    work: Arc<OutstandingWork>,
    count: usize,
}

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        self.work.complete(std::mem::take(&mut self.count));
    }
}
