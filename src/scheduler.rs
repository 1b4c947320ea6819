//! Per-monitor scheduler (C6): one ticker per (monitor, URL) at the schedule interval;
//! fan-out `effective_calls_per_interval` concurrent probes per tick; cancellable.

use crate::delivery::Delivery;
use crate::model::{Agent, Monitor, Schedule};
use crate::probe::ProbeExecutor;
use std::sync::Arc;
use tokio::time::{interval_at, Instant as TokioInstant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Starts one scheduler task per URL in the monitor's effective URL set. Returns
/// immediately; schedulers run until `cancel` fires.
pub fn spawn_monitor_schedulers(
    agent: Arc<Agent>,
    monitor: Arc<Monitor>,
    schedule: Arc<Schedule>,
    executor: Arc<dyn ProbeExecutor>,
    delivery: Arc<Delivery>,
    cancel: CancellationToken,
) {
    for url in monitor.effective_urls() {
        let agent = Arc::clone(&agent);
        let monitor = Arc::clone(&monitor);
        let schedule = Arc::clone(&schedule);
        let executor = Arc::clone(&executor);
        let delivery = Arc::clone(&delivery);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            if let Err(panicked) = run_scheduler(agent, monitor, schedule, executor, delivery, cancel, url.clone()).await {
                error!(%url, error = ?panicked, "scheduler task ended unexpectedly");
            }
        });
    }
}

async fn run_scheduler(
    agent: Arc<Agent>,
    monitor: Arc<Monitor>,
    schedule: Arc<Schedule>,
    executor: Arc<dyn ProbeExecutor>,
    delivery: Arc<Delivery>,
    cancel: CancellationToken,
    url: String,
) -> Result<(), String> {
    let period = std::time::Duration::from_secs(schedule.interval_s as u64);
    // First tick fires after one full interval, not immediately.
    let mut ticker = interval_at(TokioInstant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let n = monitor.effective_calls_per_interval(&schedule);
                for _ in 0..n {
                    spawn_probe(
                        Arc::clone(&agent),
                        Arc::clone(&monitor),
                        Arc::clone(&schedule),
                        Arc::clone(&executor),
                        Arc::clone(&delivery),
                        url.clone(),
                    );
                }
            }
            _ = cancel.cancelled() => {
                info!(monitor_id = monitor.id, %url, "scheduler cancelled");
                return Ok(());
            }
        }
    }
}

/// Spawns one probe as its own task so a panic inside it cannot take down the
/// scheduler or sibling schedulers; the join is awaited on a separate task purely to
/// log a panic, never to block the ticker.
fn spawn_probe(
    agent: Arc<Agent>,
    monitor: Arc<Monitor>,
    schedule: Arc<Schedule>,
    executor: Arc<dyn ProbeExecutor>,
    delivery: Arc<Delivery>,
    url: String,
) {
    let handle = tokio::spawn(async move {
        let hb = executor.execute(&agent, &monitor, &schedule, &url).await;
        delivery.accept(hb).await;
    });

    tokio::spawn(async move {
        if let Err(e) = handle.await {
            warn!(error = %e, "probe task panicked, heartbeat for this tick was not delivered");
        }
    });
}
