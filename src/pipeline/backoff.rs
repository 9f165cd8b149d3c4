use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Waits `delay` before the next attempt, returning early once
/// `cancellation` fires. A zero delay only yields so a failing tight loop
/// cannot starve other tasks on the same worker thread.
///
/// Returns `false` when the wait was cut short by cancellation.
pub(crate) async fn pause(delay: Duration, cancellation: &CancellationToken) -> bool {
    if delay.is_zero() {
        yield_now().await;
        return !cancellation.is_cancelled();
    }

    tokio::select! {
        _ = cancellation.cancelled() => false,
        _ = sleep(delay) => true,
    }
}
