//! Repeating cancellable background tasks.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Runs `job` every `period` until `cancel` fires.
///
/// The first run happens one full period after the call. Ticks missed while a
/// slow job is running are skipped, not queued. Cancellation is observed
/// between runs; a job already in progress is allowed to finish.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    info!(task = name, period_secs = period.as_secs(), "Periodic task started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(task = name, "Periodic task stopped");
                return;
            }
            _ = ticker.tick() => {}
        }
        debug!(task = name, "Periodic task tick");
        job().await;
    }
}
