//! Leader election (C8): acquires an exclusive lease on the agent identity so at most
//! one instance actively probes per `agent_id` at a time.

pub mod api;
pub mod db;

use crate::collector::Collector;
use crate::model::ConfigSnapshot;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[async_trait::async_trait]
pub trait LeaseProvider: Send + Sync {
    async fn try_acquire(&self, agent_id: i64) -> Result<bool, String>;
    async fn release(&self, agent_id: i64) -> Result<(), String>;
    /// How long to sleep between acquire attempts when the lease is already held
    /// elsewhere: 30s for the API provider, 60s + 0-10s jitter for the DB provider.
    fn idle_wait(&self) -> std::time::Duration;
}

/// Runs forever (until `shutdown` fires): try to acquire the lease; if acquired, run
/// the collector under a child of `shutdown`, restarting it in a fresh child scope
/// every time the snapshot changes (via `snapshot_rx`) without releasing the lease,
/// and release only once `shutdown` actually fires; if not acquired, sleep
/// `idle_wait()` and retry; on a transport error acquiring, sleep 10s and retry.
/// Wrapped in its own recover-and-log boundary so a panic here never reaches the
/// control loop.
pub async fn run_leader_election(
    lease: Arc<dyn LeaseProvider>,
    collector: Arc<Collector>,
    agent_id: i64,
    mut snapshot_rx: watch::Receiver<Arc<ConfigSnapshot>>,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            return;
        }

        match lease.try_acquire(agent_id).await {
            Ok(true) => {
                info!(agent_id, "acquired leadership lease");

                // Hold the lease for as long as this arm runs. A config change
                // restarts only the collector, in a fresh scope nested under
                // `shutdown` — it never touches the lease. The lease is released
                // below only once this instance is actually shutting down.
                'leading: loop {
                    let collector_scope = shutdown.child_token();
                    let snapshot = snapshot_rx.borrow().clone();
                    let run_fut = collector.run(&snapshot, agent_id, collector_scope.clone());
                    tokio::pin!(run_fut);

                    loop {
                        tokio::select! {
                            _ = &mut run_fut => break 'leading,
                            _ = shutdown.cancelled() => {
                                collector_scope.cancel();
                                break 'leading;
                            }
                            changed = snapshot_rx.changed() => {
                                if changed.is_ok() {
                                    info!(agent_id, "monitor set changed, restarting collector under the held lease");
                                    collector_scope.cancel();
                                    continue 'leading;
                                }
                            }
                        }
                    }
                }

                if let Err(e) = lease.release(agent_id).await {
                    warn!(agent_id, error = %e, "failed to release leadership lease");
                }
                info!(agent_id, "released leadership lease");
            }
            Ok(false) => {
                tokio::time::sleep(lease.idle_wait()).await;
            }
            Err(e) => {
                error!(agent_id, error = %e, "failed to acquire leadership lease, retrying");
                tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            }
        }
    }
}

/// 60s + 0-10s jitter, for the DB advisory-lock provider.
pub fn db_idle_wait() -> std::time::Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..10_000);
    std::time::Duration::from_secs(60) + std::time::Duration::from_millis(jitter_ms)
}
