use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{init_tracing, numbered_messages, test_config, wait_for},
    mock_queue::ScriptedQueue,
};
use anyhow::{Context, Result};
use queue_worker::{FixedDelayHandler, Runner};
use tokio::sync::Notify;
use tokio::time::timeout;

fn interrupt_source(interrupts: &Arc<Notify>) -> impl FnMut() -> futures::future::BoxFuture<'static, ()> {
    let interrupts = interrupts.clone();
    move || {
        let interrupts = interrupts.clone();
        Box::pin(async move { interrupts.notified().await })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn first_interrupt_runs_graceful_shutdown() -> Result<()> {
    init_tracing();
    let queue = Arc::new(ScriptedQueue::new(vec![numbered_messages("graceful", 3)]));
    let mut runner = Runner::new(
        test_config(Duration::from_millis(50))?,
        queue.clone(),
        FixedDelayHandler::new(Duration::from_millis(10)),
    );
    let health = runner.health();
    let telemetry = runner.service().telemetry();
    let interrupts = Arc::new(Notify::new());

    let run = {
        let interrupt = interrupt_source(&interrupts);
        tokio::spawn(async move {
            let result = runner.run_until_interrupted(interrupt).await;
            (runner, result)
        })
    };

    wait_for("runner to become healthy", Duration::from_secs(2), || {
        health.is_healthy()
    })
    .await?;
    wait_for("messages dispatched", Duration::from_secs(2), || {
        telemetry.dispatched() == 3
    })
    .await?;
    interrupts.notify_one();

    let (runner, result) = timeout(Duration::from_secs(5), run)
        .await
        .context("runner should exit after the interrupt")??;
    result?;

    assert_eq!(queue.deleted_count(), 3);
    assert!(!health.is_healthy());
    assert!(!runner.service().is_running());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_interrupt_forces_shutdown() -> Result<()> {
    init_tracing();
    let queue = Arc::new(ScriptedQueue::new(vec![numbered_messages("stuck", 1)]));
    let mut runner = Runner::new(
        test_config(Duration::from_millis(50))?,
        queue.clone(),
        FixedDelayHandler::new(Duration::from_secs(60)),
    );
    let health = runner.health();
    let outstanding = runner.service().outstanding();
    let interrupts = Arc::new(Notify::new());

    let run = {
        let interrupt = interrupt_source(&interrupts);
        tokio::spawn(async move { runner.run_until_interrupted(interrupt).await })
    };

    wait_for("the stuck message to be in flight", Duration::from_secs(2), || {
        outstanding.current() == 1
    })
    .await?;
    interrupts.notify_one();
    wait_for("graceful shutdown to begin", Duration::from_secs(2), || {
        !health.is_healthy()
    })
    .await?;
    interrupts.notify_one();

    let result = timeout(Duration::from_secs(2), run)
        .await
        .context("a second interrupt must not wait for the stuck handler")??;
    let err = result.expect_err("forced shutdown should be reported");
    assert!(
        err.to_string().contains("shutdown forced"),
        "unexpected error: {err:#}"
    );
    assert_eq!(queue.deleted_count(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelling_the_token_stops_the_runner() -> Result<()> {
    init_tracing();
    let queue = Arc::new(ScriptedQueue::new(Vec::new()));
    let mut runner = Runner::new(
        test_config(Duration::from_millis(50))?,
        queue,
        FixedDelayHandler::default(),
    );
    let token = runner.cancellation_token();
    let health = runner.health();

    let run = tokio::spawn(async move {
        runner
            .run_until_interrupted(|| std::future::pending::<()>())
            .await
    });

    wait_for("runner to become healthy", Duration::from_secs(2), || {
        health.is_healthy()
    })
    .await?;
    token.cancel();

    timeout(Duration::from_secs(5), run)
        .await
        .context("runner should exit after cancellation")???;
    assert!(!health.is_healthy());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn start_and_stop_are_idempotent() -> Result<()> {
    init_tracing();
    let queue = Arc::new(ScriptedQueue::new(vec![numbered_messages("manual", 2)]));
    let mut runner = Runner::new(
        test_config(Duration::from_millis(50))?,
        queue.clone(),
        FixedDelayHandler::new(Duration::from_millis(5)),
    );

    runner.stop().await?;
    runner.start()?;
    runner.start()?;
    let telemetry = runner.service().telemetry();
    wait_for("both messages acknowledged", Duration::from_secs(5), || {
        telemetry.acknowledged() == 2
    })
    .await?;

    let token = runner.cancellation_token();
    timeout(Duration::from_secs(5), runner.stop())
        .await
        .context("stop timed out")??;
    assert!(token.is_cancelled());
    assert!(!runner.cancellation_token().is_cancelled());
    runner.stop().await?;
    Ok(())
}
