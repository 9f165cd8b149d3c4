use std::sync::Arc;
use std::time::Duration;

use crate::support::helpers::{init_tracing, test_config, wait_for, RecordingHandler, TEST_QUEUE_URL};
use anyhow::{Context, Result};
use queue_worker::{FixedDelayHandler, InMemoryQueue, MessageQueue, Service};
use tokio::time::timeout;

fn memory_queue() -> Arc<InMemoryQueue> {
    Arc::new(InMemoryQueue::new(TEST_QUEUE_URL).with_receive_wait(Duration::from_millis(50)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn drains_the_queue_end_to_end() -> Result<()> {
    init_tracing();
    let queue = memory_queue();
    queue.send_batch(25, "payload");

    let mut service = Service::new(
        test_config(Duration::from_millis(100))?,
        queue.clone(),
        FixedDelayHandler::new(Duration::from_millis(10)),
    );
    service.start()?;

    let telemetry = service.telemetry();
    wait_for("25 acknowledgments", Duration::from_secs(5), || {
        telemetry.acknowledged() == 25
    })
    .await?;
    timeout(Duration::from_secs(5), service.shutdown())
        .await
        .context("shutdown timed out")??;

    assert_eq!(queue.visible_len(), 0);
    assert_eq!(queue.in_flight_len(), 0);
    let deleted = queue.deleted_batches();
    assert_eq!(deleted.iter().sum::<usize>(), 25);
    assert!(deleted.iter().all(|size| (1..=10).contains(size)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn receive_failures_are_survived() -> Result<()> {
    init_tracing();
    let queue = memory_queue();
    queue.fail_next_receives(3);
    queue.send_batch(4, "after-outage");

    let mut service = Service::new(
        test_config(Duration::from_millis(100))?,
        queue.clone(),
        FixedDelayHandler::new(Duration::ZERO),
    );
    service.start()?;

    let telemetry = service.telemetry();
    wait_for("4 acknowledgments", Duration::from_secs(5), || {
        telemetry.acknowledged() == 4
    })
    .await?;
    timeout(Duration::from_secs(5), service.shutdown())
        .await
        .context("shutdown timed out")??;

    assert_eq!(telemetry.snapshot().receive_errors, 3);
    assert_eq!(queue.in_flight_len(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_messages_are_redelivered_by_the_queue() -> Result<()> {
    init_tracing();
    let queue = Arc::new(
        InMemoryQueue::new(TEST_QUEUE_URL)
            .with_receive_wait(Duration::from_millis(50))
            .with_visibility_timeout(Duration::from_millis(200)),
    );
    queue.send("poison");
    queue.send("fine");

    let handler = RecordingHandler::new(Duration::ZERO).failing_on(&["poison"]);
    let mut service = Service::new(
        test_config(Duration::from_millis(50))?,
        queue.clone(),
        handler.clone(),
    );
    service.start()?;

    wait_for("the poison message to fail twice", Duration::from_secs(5), || {
        handler.failed().len() >= 2
    })
    .await?;
    timeout(Duration::from_secs(5), service.shutdown())
        .await
        .context("shutdown timed out")??;

    assert_eq!(handler.handled(), vec!["fine".to_string()]);
    assert!(handler.failed().iter().all(|body| body == "poison"));
    assert_eq!(queue.visible_len() + queue.in_flight_len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn service_can_restart_after_shutdown() -> Result<()> {
    init_tracing();
    let queue = memory_queue();
    let mut service = Service::new(
        test_config(Duration::from_millis(50))?,
        queue.clone(),
        FixedDelayHandler::new(Duration::from_millis(5)),
    );
    let telemetry = service.telemetry();

    queue.send_batch(5, "first-run");
    service.start()?;
    wait_for("first run acknowledgments", Duration::from_secs(5), || {
        telemetry.acknowledged() == 5
    })
    .await?;
    timeout(Duration::from_secs(5), service.shutdown())
        .await
        .context("first shutdown timed out")??;
    let first_completion = service.completion();
    assert!(first_completion.is_complete());

    queue.send_batch(6, "second-run");
    service.start()?;
    assert!(!service.completion().is_complete());
    assert!(service.health().is_healthy());
    wait_for("second run acknowledgments", Duration::from_secs(5), || {
        telemetry.acknowledged() == 11
    })
    .await?;
    timeout(Duration::from_secs(5), service.shutdown())
        .await
        .context("second shutdown timed out")??;

    assert!(service.completion().is_complete());
    assert_eq!(queue.visible_len() + queue.in_flight_len(), 0);
    Ok(())
}

#[tokio::test]
async fn stale_receipts_cannot_delete() -> Result<()> {
    let queue = memory_queue();
    queue.send("once");
    let received = queue.receive().await?;
    queue.delete(&received).await?;
    assert!(queue.delete(&received).await.is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn service_restarts_after_abort() -> Result<()> {
    init_tracing();
    let queue = memory_queue();
    queue.send_batch(5, "held");
    let mut service = Service::new(
        test_config(Duration::from_secs(30))?,
        queue.clone(),
        FixedDelayHandler::new(Duration::ZERO),
    );

    service.start()?;
    let telemetry = service.telemetry();
    let outstanding = service.outstanding();
    wait_for("all five handled and waiting in a batch", Duration::from_secs(2), || {
        telemetry.dispatched() == 5 && outstanding.current() == 5
    })
    .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    service.abort();
    wait_for("aborted batch to be released", Duration::from_secs(2), || {
        outstanding.current() == 0
    })
    .await?;
    assert_eq!(telemetry.acknowledged(), 0);
    assert_eq!(queue.in_flight_len(), 5, "unacknowledged messages await redelivery");

    service.start()?;
    assert!(service.health().is_healthy());
    timeout(Duration::from_secs(5), service.shutdown())
        .await
        .context("shutdown after restart timed out")??;
    assert_eq!(outstanding.current(), 0);
    Ok(())
}
