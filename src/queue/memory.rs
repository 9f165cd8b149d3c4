//! In-process [`MessageQueue`] with receipt-based acknowledgment.
//!
//! Behaves like a hosted work queue closely enough to drive the pipeline
//! locally: receives long-poll when the queue is empty, received messages stay
//! hidden until deleted or until their visibility timeout lapses, and each
//! delivery gets a fresh receipt so stale receipts cannot delete a redelivered
//! message. Failures can be injected for either call.

use crate::queue::client::{
    MessageQueue, QueueError, QueueFuture, MAX_DELETE_BATCH_SIZE, MAX_RECEIVE_BATCH_SIZE,
};
use crate::queue::message::Message;
use anyhow::anyhow;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// How long an empty receive waits for new messages before returning.
pub const DEFAULT_RECEIVE_WAIT: Duration = Duration::from_secs(5);
/// How long a received message stays hidden before it is redelivered.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);
/// Number of most recent delete calls whose sizes are remembered.
pub const DELETE_HISTORY_LIMIT: usize = 1_024;

#[derive(Debug)]
pub struct InMemoryQueue {
    url: String,
    state: Mutex<QueueState>,
    arrivals: Notify,
    next_id: AtomicU64,
    receive_wait: Duration,
    visibility_timeout: Duration,
    pending_receive_failures: AtomicUsize,
    fail_deletes: AtomicBool,
}

#[derive(Debug, Default)]
struct QueueState {
    visible: VecDeque<StoredMessage>,
    in_flight: HashMap<Arc<str>, InFlight>,
    deleted_batches: VecDeque<usize>,
    deleted_total: u64,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    body: Arc<str>,
    deliveries: u32,
}

#[derive(Debug)]
struct InFlight {
    message: StoredMessage,
    visible_at: Instant,
}

impl InMemoryQueue {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: Mutex::new(QueueState::default()),
            arrivals: Notify::new(),
            next_id: AtomicU64::new(0),
            receive_wait: DEFAULT_RECEIVE_WAIT,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            pending_receive_failures: AtomicUsize::new(0),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn with_receive_wait(mut self, wait: Duration) -> Self {
        self.receive_wait = wait;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Enqueues one message and wakes any long-polling receiver.
    pub fn send(&self, body: impl Into<Arc<str>>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.lock_state().visible.push_back(StoredMessage {
            id,
            body: body.into(),
            deliveries: 0,
        });
        self.arrivals.notify_waiters();
        id
    }

    /// Enqueues `count` copies of `body`.
    pub fn send_batch(&self, count: usize, body: &str) -> Vec<u64> {
        let body: Arc<str> = Arc::from(body);
        let ids = {
            let mut state = self.lock_state();
            (0..count)
                .map(|_| {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    state.visible.push_back(StoredMessage {
                        id,
                        body: body.clone(),
                        deliveries: 0,
                    });
                    id
                })
                .collect()
        };
        self.arrivals.notify_waiters();
        ids
    }

    /// Makes the next `count` receive calls fail.
    pub fn fail_next_receives(&self, count: usize) {
        self.pending_receive_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Messages currently available for delivery.
    pub fn visible_len(&self) -> usize {
        let mut state = self.lock_state();
        Self::restore_expired(&mut state, Instant::now());
        state.visible.len()
    }

    /// Messages received but neither deleted nor expired yet.
    pub fn in_flight_len(&self) -> usize {
        let mut state = self.lock_state();
        Self::restore_expired(&mut state, Instant::now());
        state.in_flight.len()
    }

    /// Sizes of the most recent successful delete calls (at most
    /// [`DELETE_HISTORY_LIMIT`]), oldest first.
    pub fn deleted_batches(&self) -> Vec<usize> {
        self.lock_state().deleted_batches.iter().copied().collect()
    }

    /// Messages deleted over the lifetime of the queue.
    pub fn deleted_total(&self) -> u64 {
        self.lock_state().deleted_total
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_receive_failure(&self) -> bool {
        self.pending_receive_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                pending.checked_sub(1)
            })
            .is_ok()
    }

    fn restore_expired(state: &mut QueueState, now: Instant) {
        let expired: Vec<Arc<str>> = state
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(entry) = state.in_flight.remove(&receipt) {
                tracing::debug!(
                    target: "queue_worker::memory",
                    id = entry.message.id,
                    deliveries = entry.message.deliveries,
                    "visibility timeout lapsed; message visible again"
                );
                state.visible.push_back(entry.message);
            }
        }
    }

    fn take_visible(&self) -> Vec<Message> {
        let now = Instant::now();
        let mut state = self.lock_state();
        Self::restore_expired(&mut state, now);

        let count = state.visible.len().min(MAX_RECEIVE_BATCH_SIZE);
        let mut delivered = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(mut stored) = state.visible.pop_front() else {
                break;
            };
            stored.deliveries += 1;
            let receipt: Arc<str> = Arc::from(format!("{}-{}", stored.id, stored.deliveries));
            delivered.push(Message::new(receipt.clone(), stored.body.clone()));
            state.in_flight.insert(
                receipt,
                InFlight {
                    message: stored,
                    visible_at: now + self.visibility_timeout,
                },
            );
        }
        delivered
    }
}

impl MessageQueue for InMemoryQueue {
    fn receive(&self) -> QueueFuture<'_, Vec<Message>> {
        Box::pin(async move {
            if self.take_receive_failure() {
                return Err(QueueError::receive(anyhow!(
                    "injected receive failure for {}",
                    self.url
                )));
            }

            let deadline = Instant::now() + self.receive_wait;
            loop {
                // Registered before the check so a send racing with it still wakes us.
                let arrived = self.arrivals.notified();
                let messages = self.take_visible();
                if !messages.is_empty() || Instant::now() >= deadline {
                    return Ok(messages);
                }
                if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                    return Ok(self.take_visible());
                }
            }
        })
    }

    fn delete<'a>(&'a self, batch: &'a [Message]) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(QueueError::delete(anyhow!(
                    "injected delete failure for {}",
                    self.url
                )));
            }

            if batch.is_empty() || batch.len() > MAX_DELETE_BATCH_SIZE {
                return Err(QueueError::delete(anyhow!(
                    "delete batch must hold 1..={MAX_DELETE_BATCH_SIZE} messages, got {}",
                    batch.len()
                )));
            }

            let mut state = self.lock_state();
            Self::restore_expired(&mut state, Instant::now());
            if let Some(unknown) = batch
                .iter()
                .find(|message| !state.in_flight.contains_key(message.receipt()))
            {
                return Err(QueueError::delete(anyhow!(
                    "receipt {} is not in flight",
                    unknown.receipt()
                )));
            }

            for message in batch {
                state.in_flight.remove(message.receipt());
            }
            if state.deleted_batches.len() == DELETE_HISTORY_LIMIT {
                state.deleted_batches.pop_front();
            }
            state.deleted_batches.push_back(batch.len());
            state.deleted_total += batch.len() as u64;
            Ok(())
        })
    }
}
