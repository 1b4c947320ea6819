//! Control loop (C9): bootstrap, periodic config reload with retry/backoff,
//! diff-triggered collector restart, graceful shutdown.

use crate::collector::Collector;
use crate::config::RuntimeConfig;
use crate::config_loader::ConfigLoader;
use crate::health::Readiness;
use crate::leader::LeaseProvider;
use crate::model::{Agent, ConfigSnapshot, Thresholds};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const BOOTSTRAP_MAX_ATTEMPTS: u32 = 10;
const SHORT_RELOAD_INTERVAL: Duration = Duration::from_secs(5 * 60);
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

/// Loads config with up to 10 attempts, linear backoff (`attempt * 5s`, capped at
/// 60s). If every attempt fails, returns an empty-but-structurally-valid snapshot so
/// the agent starts as a live-but-idle process rather than crash-looping.
pub async fn bootstrap(loader: &dyn ConfigLoader, agent_id: i64, readiness: &Readiness) -> ConfigSnapshot {
    for attempt in 1..=BOOTSTRAP_MAX_ATTEMPTS {
        match loader.load().await {
            Ok(snapshot) => {
                readiness.set(true);
                return snapshot;
            }
            Err(e) => {
                if attempt == BOOTSTRAP_MAX_ATTEMPTS {
                    error!(attempt, error = %e, "failed to load initial config after all attempts, starting with empty configuration");
                    readiness.set(false);
                    break;
                }
                let wait = Duration::from_secs((attempt as u64 * 5).min(60));
                warn!(attempt, max_attempts = BOOTSTRAP_MAX_ATTEMPTS, error = %e, ?wait, "failed to load config, retrying");
                tokio::time::sleep(wait).await;
            }
        }
    }

    ConfigSnapshot {
        schedules: vec![],
        agents: vec![Agent {
            id: agent_id,
            name: "agent".to_string(),
            datacenter: crate::model::Datacenter::default(),
            global_thresholds: Thresholds { warning_ms: 300, critical_ms: 800 },
            global_schedules: vec![],
            monitors: vec![],
        }],
    }
}

fn reload_interval_for(snapshot: &ConfigSnapshot, configured: Duration) -> Duration {
    if snapshot.monitor_ids().is_empty() {
        SHORT_RELOAD_INTERVAL
    } else {
        configured
    }
}

/// Runs the control loop to completion (on SIGINT/SIGTERM). Spawns the leader
/// election loop (which owns the collector) and the health server as background
/// tasks, then drives the reload ticker and shutdown signal itself.
pub async fn run(
    runtime_config: RuntimeConfig,
    loader: Arc<dyn ConfigLoader>,
    lease: Arc<dyn LeaseProvider>,
    collector: Arc<Collector>,
    readiness: Readiness,
) {
    let agent_id = runtime_config.agent_id;
    let mut current = bootstrap(loader.as_ref(), agent_id, &readiness).await;

    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(current.clone()));
    let shutdown = CancellationToken::new();

    crate::health::spawn_health_server(runtime_config.health_port, readiness.clone(), shutdown.clone());

    tokio::spawn(crate::leader::run_leader_election(
        lease,
        collector,
        agent_id,
        snapshot_rx,
        shutdown.clone(),
    ));

    let mut reload_ticker = tokio::time::interval(reload_interval_for(&current, runtime_config.config_reload_interval));
    reload_ticker.reset();

    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("shutdown signal received");
                shutdown.cancel();
                tokio::time::sleep(SHUTDOWN_DRAIN).await;
                info!("application shut down");
                return;
            }
            _ = reload_ticker.tick() => {
                match loader.load().await {
                    Err(e) => {
                        readiness.set(false);
                        warn!(error = %e, "failed to reload config, will retry later");
                    }
                    Ok(new_snapshot) => {
                        readiness.set(true);
                        let old_ids = current.monitor_ids();
                        let new_ids = new_snapshot.monitor_ids();
                        let changed = old_ids != new_ids;

                        current = new_snapshot;
                        reload_ticker = tokio::time::interval(reload_interval_for(&current, runtime_config.config_reload_interval));
                        reload_ticker.reset();

                        if changed {
                            info!(monitor_count = new_ids.len(), "monitor set changed, restarting collector");
                            if snapshot_tx.send(Arc::new(current.clone())).is_err() {
                                error!("leader election task is gone, cannot deliver new config");
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
