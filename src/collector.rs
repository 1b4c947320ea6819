//! Collector (C7): owns the set of schedulers and the sink; lifecycle tied to a
//! cancellation token. Starts one scheduler per (monitor, URL) in the config snapshot's
//! agent and runs until cancelled.

use crate::delivery::Delivery;
use crate::model::ConfigSnapshot;
use crate::probe::ProbeExecutor;
use crate::scheduler::spawn_monitor_schedulers;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct Collector {
    delivery: Arc<Delivery>,
    executor: Arc<dyn ProbeExecutor>,
}

impl Collector {
    pub fn new(delivery: Arc<Delivery>, executor: Arc<dyn ProbeExecutor>) -> Self {
        Self { delivery, executor }
    }

    /// Starts every scheduler for `agent_id`'s monitors under `cancel`'s scope, plus
    /// the batch timer and overflow flusher, then blocks until `cancel` fires.
    pub async fn run(&self, snapshot: &ConfigSnapshot, agent_id: i64, cancel: CancellationToken) {
        let Some(agent) = snapshot.agent(agent_id) else {
            warn!(agent_id, "no agent entry in config snapshot, collector idling");
            cancel.cancelled().await;
            return;
        };
        let agent = Arc::new(agent.clone());

        self.delivery.spawn_batch_timer(cancel.clone());
        self.delivery.spawn_overflow_flusher(cancel.clone());

        for monitor in &agent.monitors {
            let Some(schedule) = agent.schedule_for(monitor) else {
                warn!(monitor_id = monitor.id, schedule_id = monitor.schedule_id, "schedule not found for monitor, skipping");
                continue;
            };
            spawn_monitor_schedulers(
                Arc::clone(&agent),
                Arc::new(monitor.clone()),
                Arc::new(schedule.clone()),
                Arc::clone(&self.executor),
                Arc::clone(&self.delivery),
                cancel.clone(),
            );
        }

        cancel.cancelled().await;
    }
}
