//! Runs the worker pipeline against an in-process queue fed from stdin.
//!
//! Every line typed is enqueued; a line starting with a digit is enqueued that
//! many times. Ctrl-C starts a graceful shutdown, a second Ctrl-C forces it.

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use queue_worker::{FixedDelayHandler, InMemoryQueue, Runner, WorkerConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

const DEFAULT_MAX_BATCH_SIZE: usize = 10;
const DEFAULT_BATCH_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_HANDLER_DELAY_MS: u64 = 3_000;
const DEFAULT_RECEIVE_WAIT_MS: u64 = 5_000;
const DEFAULT_VISIBILITY_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CHANNEL_CAPACITY: usize = 1;
const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 0;
const DEFAULT_LOG_DIRECTIVE: &str = "info";

#[tokio::main]
async fn main() -> Result<()> {
    init_example_tracing();

    let args = ExampleArgs::from_env()?;
    let config = args.to_worker_config()?;
    let queue = Arc::new(
        InMemoryQueue::new(config.queue_url())
            .with_receive_wait(args.receive_wait)
            .with_visibility_timeout(args.visibility_timeout),
    );

    let feeder = spawn_stdin_feeder(queue.clone());
    let mut runner = Runner::new(
        config,
        queue.clone(),
        FixedDelayHandler::new(args.handler_delay),
    );

    let run_result = runner.run_until_ctrl_c().await;
    feeder.abort();

    let snapshot = runner.service().telemetry().snapshot();
    println!(
        "received {} / acknowledged {} / handler failures {} / delete failures {} / left in queue {}",
        snapshot.received,
        snapshot.acknowledged,
        snapshot.handler_failures,
        snapshot.delete_failures,
        queue.visible_len() + queue.in_flight_len(),
    );

    run_result
}

fn init_example_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    queue_worker::init_tracing();
}

fn spawn_stdin_feeder(queue: Arc<InMemoryQueue>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("Enter your message (CTRL-C to exit):");
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.is_empty() {
                        continue;
                    }
                    match enqueue_line(&queue, &line) {
                        0 => println!("Leading 0 asks for no copies; nothing sent."),
                        copies => println!("Sent {copies}!"),
                    }
                }
                Ok(None) => {
                    tracing::info!("stdin closed; no more messages will be enqueued");
                    break;
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to read stdin");
                    break;
                }
            }
        }
    })
}

/// Enqueues the copies `line` asks for and returns how many were sent.
fn enqueue_line(queue: &InMemoryQueue, line: &str) -> usize {
    let copies = copies_for_line(line);
    if copies > 0 {
        queue.send_batch(copies, line);
    }
    copies
}

/// A leading digit sets how many copies of the line are enqueued.
fn copies_for_line(line: &str) -> usize {
    line.chars()
        .next()
        .and_then(|first| first.to_digit(10))
        .map_or(1, |digit| digit as usize)
}

struct ExampleArgs {
    queue_url: String,
    max_batch_size: usize,
    batch_timeout: Duration,
    handler_delay: Duration,
    receive_wait: Duration,
    visibility_timeout: Duration,
    channel_capacity: usize,
    max_concurrent_handlers: usize,
}

impl ExampleArgs {
    fn from_env() -> Result<Self> {
        let queue_url = env::var("QUEUE_WORKER_QUEUE_URL")
            .context("QUEUE_WORKER_QUEUE_URL must name the queue to consume")?;
        let max_batch_size =
            parse_env_with_default::<usize>("QUEUE_WORKER_MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE)?;
        let batch_timeout_ms = parse_env_with_default::<u64>(
            "QUEUE_WORKER_BATCH_TIMEOUT_MS",
            DEFAULT_BATCH_TIMEOUT_MS,
        )?;
        let handler_delay_ms = parse_env_with_default::<u64>(
            "QUEUE_WORKER_HANDLER_DELAY_MS",
            DEFAULT_HANDLER_DELAY_MS,
        )?;
        let receive_wait_ms = parse_env_with_default::<u64>(
            "QUEUE_WORKER_RECEIVE_WAIT_MS",
            DEFAULT_RECEIVE_WAIT_MS,
        )?;
        let visibility_timeout_ms = parse_env_with_default::<u64>(
            "QUEUE_WORKER_VISIBILITY_TIMEOUT_MS",
            DEFAULT_VISIBILITY_TIMEOUT_MS,
        )?;
        let channel_capacity = parse_env_with_default::<usize>(
            "QUEUE_WORKER_CHANNEL_CAPACITY",
            DEFAULT_CHANNEL_CAPACITY,
        )?;
        let max_concurrent_handlers = parse_env_with_default::<usize>(
            "QUEUE_WORKER_MAX_CONCURRENT_HANDLERS",
            DEFAULT_MAX_CONCURRENT_HANDLERS,
        )?;

        ensure!(
            receive_wait_ms > 0,
            "QUEUE_WORKER_RECEIVE_WAIT_MS must be greater than 0"
        );
        ensure!(
            visibility_timeout_ms > 0,
            "QUEUE_WORKER_VISIBILITY_TIMEOUT_MS must be greater than 0"
        );

        Ok(Self {
            queue_url,
            max_batch_size,
            batch_timeout: Duration::from_millis(batch_timeout_ms),
            handler_delay: Duration::from_millis(handler_delay_ms),
            receive_wait: Duration::from_millis(receive_wait_ms),
            visibility_timeout: Duration::from_millis(visibility_timeout_ms),
            channel_capacity,
            max_concurrent_handlers,
        })
    }

    fn to_worker_config(&self) -> Result<WorkerConfig> {
        let mut builder = WorkerConfig::builder()
            .queue_url(self.queue_url.clone())
            .max_batch_size(self.max_batch_size)
            .batch_timeout(self.batch_timeout)
            .channel_capacity(self.channel_capacity);

        // Zero keeps dispatch unbounded.
        if self.max_concurrent_handlers > 0 {
            builder = builder.max_concurrent_handlers(self.max_concurrent_handlers);
        }

        builder.build()
    }
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}
