use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::anyhow;
use queue_worker::{Message, MessageQueue, QueueError, QueueFuture, MAX_DELETE_BATCH_SIZE};

/// Queue that replays scripted receive responses, then returns empty
/// receives, and records every delete call.
pub struct ScriptedQueue {
    responses: Mutex<VecDeque<Vec<Message>>>,
    empty_receive_delay: Duration,
    deleted: Mutex<Vec<Vec<String>>>,
    delete_attempts: AtomicUsize,
    fail_deletes: AtomicBool,
}

impl ScriptedQueue {
    pub fn new(responses: Vec<Vec<Message>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            empty_receive_delay: Duration::from_millis(10),
            deleted: Mutex::new(Vec::new()),
            delete_attempts: AtomicUsize::new(0),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn failing_deletes(self) -> Self {
        self.fail_deletes.store(true, Ordering::SeqCst);
        self
    }

    pub fn push_response(&self, messages: Vec<Message>) {
        self.responses.lock().unwrap().push_back(messages);
    }

    /// Receipts of every successful delete call, in call order.
    pub fn deleted_batches(&self) -> Vec<Vec<String>> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn deleted_batch_sizes(&self) -> Vec<usize> {
        self.deleted_batches().iter().map(Vec::len).collect()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted_batch_sizes().iter().sum()
    }

    pub fn delete_attempts(&self) -> usize {
        self.delete_attempts.load(Ordering::SeqCst)
    }
}

impl MessageQueue for ScriptedQueue {
    fn receive(&self) -> QueueFuture<'_, Vec<Message>> {
        let next = self.responses.lock().unwrap().pop_front();
        let delay = self.empty_receive_delay;
        Box::pin(async move {
            match next {
                Some(messages) => Ok(messages),
                None => {
                    tokio::time::sleep(delay).await;
                    Ok(Vec::new())
                }
            }
        })
    }

    fn delete<'a>(&'a self, batch: &'a [Message]) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.delete_attempts.fetch_add(1, Ordering::SeqCst);
            if batch.len() > MAX_DELETE_BATCH_SIZE {
                return Err(QueueError::delete(anyhow!(
                    "batch of {} exceeds the delete limit",
                    batch.len()
                )));
            }
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(QueueError::delete(anyhow!("access denied")));
            }
            self.deleted.lock().unwrap().push(
                batch
                    .iter()
                    .map(|message| message.receipt().to_owned())
                    .collect(),
            );
            Ok(())
        })
    }
}
