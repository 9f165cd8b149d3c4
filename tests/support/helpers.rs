use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use once_cell::sync::Lazy;
use queue_worker::{HandlerError, HandlerFuture, Message, MessageHandler, WorkerConfig};
use tokio::time::{sleep, Instant};
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub const TEST_QUEUE_URL: &str = "memory://integration";

pub fn test_config(batch_timeout: Duration) -> Result<WorkerConfig> {
    WorkerConfig::builder()
        .queue_url(TEST_QUEUE_URL)
        .batch_timeout(batch_timeout)
        .build()
}

#[derive(Default)]
struct HandlerLog {
    handled: Vec<String>,
    failed: Vec<String>,
}

/// Handler that sleeps, then records the body it handled. Bodies listed in
/// `failing` return an error instead.
#[derive(Clone)]
pub struct RecordingHandler {
    delay: Duration,
    failing: Arc<HashSet<String>>,
    log: Arc<Mutex<HandlerLog>>,
}

impl RecordingHandler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            failing: Arc::new(HashSet::new()),
            log: Arc::new(Mutex::new(HandlerLog::default())),
        }
    }

    pub fn failing_on(mut self, bodies: &[&str]) -> Self {
        self.failing = Arc::new(bodies.iter().map(|body| body.to_string()).collect());
        self
    }

    pub fn handled(&self) -> Vec<String> {
        self.log.lock().unwrap().handled.clone()
    }

    pub fn failed(&self) -> Vec<String> {
        self.log.lock().unwrap().failed.clone()
    }
}

impl MessageHandler for RecordingHandler {
    fn handle(&self, message: &Message) -> HandlerFuture {
        let delay = self.delay;
        let body = message.body().to_owned();
        let fail = self.failing.contains(&body);
        let log = self.log.clone();
        Box::pin(async move {
            sleep(delay).await;
            if fail {
                return Err(HandlerError::new(anyhow!("refusing {body}")));
            }
            log.lock().unwrap().handled.push(body);
            Ok(())
        })
    }

    fn on_failure(&self, message: &Message, _error: &HandlerError) {
        self.log
            .lock()
            .unwrap()
            .failed
            .push(message.body().to_owned());
    }
}

pub fn numbered_messages(prefix: &str, count: usize) -> Vec<Message> {
    (0..count)
        .map(|idx| Message::new(format!("{prefix}-receipt-{idx}"), format!("{prefix}-{idx}")))
        .collect()
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_for<F>(what: &str, timeout: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("timed out after {timeout:?} waiting for {what}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}
