//! End-to-end exercise of the probing pipeline: scheduler fan-out -> probe executor
//! -> delivery -> overflow queue -> recovery, wired together the way `Collector::run`
//! wires them in production but with a fake transport so no real network is touched.
//! Component-level behavior (queue persistence, batch draining, lease exclusion, ...)
//! already has focused coverage in each module's own `#[cfg(test)]` block; this file
//! is for the cross-cutting scenario none of those exercise alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use uptime_agent::delivery::Delivery;
use uptime_agent::error::SinkError;
use uptime_agent::model::{Agent, Datacenter, ErrorType, Heartbeat, HttpMethod, Monitor, Schedule, Thresholds};
use uptime_agent::probe::ProbeExecutor;
use uptime_agent::queue::{BatchBuffer, OverflowQueue};
use uptime_agent::scheduler::spawn_monitor_schedulers;
use uptime_agent::sink::Sink;

/// A probe executor that always reports success, standing in for a real HTTP probe
/// so the test exercises scheduling and delivery, not libcurl.
struct AlwaysUpExecutor;

#[async_trait::async_trait]
impl ProbeExecutor for AlwaysUpExecutor {
    async fn execute(&self, agent: &Agent, monitor: &Monitor, schedule: &Schedule, _url: &str) -> Heartbeat {
        Heartbeat {
            monitor_id: monitor.id,
            agent_id: agent.id,
            executed_at: chrono::Utc::now(),
            success: true,
            error_type: None,
            error_message: None,
            dns_lookup_ms: 1,
            tcp_connect_ms: 2,
            tls_handshake_ms: 0,
            time_to_first_byte_ms: 100,
            response_time_ms: 120,
            status_code: 200,
            size_bytes: 64,
            content_type: Some("text/plain".into()),
            server: None,
            cache_status: None,
            warning_threshold_ms: schedule.thresholds_warning_ms,
            critical_threshold_ms: schedule.thresholds_critical_ms,
            raw_request_headers: HashMap::new(),
            raw_response_headers: HashMap::new(),
            raw_response_body: None,
        }
    }
}

/// A sink that can be toggled "down" mid-test to simulate a backend outage, and
/// counts every heartbeat it has successfully ingested.
struct FlakySink {
    up: AtomicBool,
    delivered: AtomicUsize,
}

#[async_trait::async_trait]
impl Sink for FlakySink {
    async fn submit_one(&self, _hb: &Heartbeat) -> Result<(), SinkError> {
        if self.up.load(Ordering::SeqCst) {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        } else {
            Err(SinkError::Transient("backend unavailable".into()))
        }
    }

    async fn submit_batch(&self, hbs: &[Heartbeat]) -> Result<(), SinkError> {
        if self.up.load(Ordering::SeqCst) {
            self.delivered.fetch_add(hbs.len(), Ordering::SeqCst);
            Ok(())
        } else {
            Err(SinkError::Transient("backend unavailable".into()))
        }
    }
}

fn agent(id: i64) -> Arc<Agent> {
    Arc::new(Agent {
        id,
        name: "agent".into(),
        datacenter: Datacenter::default(),
        global_thresholds: Thresholds { warning_ms: 300, critical_ms: 800 },
        global_schedules: vec![],
        monitors: vec![],
    })
}

fn monitor(id: i64, calls_per_interval: u32) -> Arc<Monitor> {
    Arc::new(Monitor {
        id,
        name: "m".into(),
        method: HttpMethod::Get,
        monitor_type: "http".into(),
        url: "http://example.invalid/ok".into(),
        additional_urls: vec![],
        schedule_id: 1,
        calls_per_interval,
        headers: HashMap::new(),
        body: String::new(),
    })
}

fn schedule(interval_s: u32) -> Arc<Schedule> {
    Arc::new(
        Schedule {
            id: 1,
            name: "s".into(),
            interval_s,
            include_response_body: false,
            thresholds_warning_ms: 300,
            thresholds_critical_ms: 800,
            calls_per_interval: 1,
        }
        .normalized(),
    )
}

/// S3-shaped scenario: the backend is down while a scheduler keeps producing
/// heartbeats, so they accumulate in the overflow queue (surviving a simulated
/// process restart via a fresh `OverflowQueue` over the same file); once the backend
/// recovers, the next flush delivers everything that was queued, none dropped.
#[tokio::test(start_paused = true)]
async fn outage_then_recovery_delivers_every_queued_heartbeat() {
    let dir = tempfile::tempdir().unwrap();
    let queue_path = dir.path().join("queue.json");

    let sink = Arc::new(FlakySink { up: AtomicBool::new(false), delivered: AtomicUsize::new(0) });
    let sink_dyn: Arc<dyn Sink> = sink.clone();
    let queue = Arc::new(OverflowQueue::new(queue_path.clone(), 1000));
    let batch = Arc::new(BatchBuffer::new(50));
    let delivery = Arc::new(Delivery::batched(sink_dyn, Arc::clone(&queue), batch));
    let executor: Arc<dyn ProbeExecutor> = Arc::new(AlwaysUpExecutor);

    let cancel = CancellationToken::new();
    delivery.spawn_batch_timer(cancel.clone());

    spawn_monitor_schedulers(agent(1), monitor(10, 1), schedule(5), executor, Arc::clone(&delivery), cancel.clone());

    // Three ticks elapse while the backend is down; the batch timer (5s) keeps
    // draining into the overflow queue rather than ever reaching the backend.
    for _ in 0..3 {
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
    }

    assert_eq!(sink.delivered.load(Ordering::SeqCst), 0, "backend is down, nothing delivered yet");
    assert_eq!(queue.len().await, 3, "every heartbeat produced while down is queued");

    // Simulate a process restart: a fresh OverflowQueue loads what was persisted.
    let reloaded = OverflowQueue::new(queue_path, 1000);
    reloaded.load_from_disk().await;
    assert_eq!(reloaded.len().await, 3, "queue survives a restart via the on-disk snapshot");

    // Backend recovers; the next flush cycle (30s) drains the reloaded queue in full.
    let sink_dyn2: Arc<dyn Sink> = sink.clone();
    let recovered_delivery = Arc::new(Delivery::direct(sink_dyn2, Arc::new(reloaded)));
    sink.up.store(true, Ordering::SeqCst);
    recovered_delivery.spawn_overflow_flusher(cancel.clone());
    tokio::time::advance(std::time::Duration::from_secs(30)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    assert_eq!(sink.delivered.load(Ordering::SeqCst), 3, "full recovery flush delivers every queued heartbeat");

    cancel.cancel();
}

/// S4-shaped scenario: `calls_per_interval = 3` fans out three concurrent probes per
/// tick, all sharing one `monitor_id` but each a distinct heartbeat, and all reach the
/// sink once the backend is healthy throughout.
#[tokio::test(start_paused = true)]
async fn healthy_backend_receives_every_fanned_out_heartbeat() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(FlakySink { up: AtomicBool::new(true), delivered: AtomicUsize::new(0) });
    let sink_dyn: Arc<dyn Sink> = sink.clone();
    let queue = Arc::new(OverflowQueue::new(dir.path().join("q.json"), 1000));
    let delivery = Arc::new(Delivery::direct(sink_dyn, queue));
    let executor: Arc<dyn ProbeExecutor> = Arc::new(AlwaysUpExecutor);

    let cancel = CancellationToken::new();
    spawn_monitor_schedulers(agent(1), monitor(10, 3), schedule(5), executor, Arc::clone(&delivery), cancel.clone());

    tokio::time::advance(std::time::Duration::from_secs(5)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    assert_eq!(sink.delivered.load(Ordering::SeqCst), 3, "one tick with calls_per_interval=3 delivers 3 heartbeats");

    cancel.cancel();
}

/// A probe failure (endpoint down) is encoded as a Heartbeat, not dropped or raised:
/// it still flows all the way through scheduling and delivery to the sink.
#[tokio::test(start_paused = true)]
async fn failing_probe_still_reaches_the_sink_as_a_heartbeat() {
    struct AlwaysDownExecutor;

    #[async_trait::async_trait]
    impl ProbeExecutor for AlwaysDownExecutor {
        async fn execute(&self, agent: &Agent, monitor: &Monitor, schedule: &Schedule, _url: &str) -> Heartbeat {
            Heartbeat {
                monitor_id: monitor.id,
                agent_id: agent.id,
                executed_at: chrono::Utc::now(),
                success: false,
                error_type: Some(ErrorType::HttpError),
                error_message: Some("connection refused".into()),
                dns_lookup_ms: 0,
                tcp_connect_ms: 0,
                tls_handshake_ms: 0,
                time_to_first_byte_ms: 0,
                response_time_ms: 10,
                status_code: 0,
                size_bytes: 0,
                content_type: None,
                server: None,
                cache_status: None,
                warning_threshold_ms: schedule.thresholds_warning_ms,
                critical_threshold_ms: schedule.thresholds_critical_ms,
                raw_request_headers: HashMap::new(),
                raw_response_headers: HashMap::new(),
                raw_response_body: None,
            }
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(FlakySink { up: AtomicBool::new(true), delivered: AtomicUsize::new(0) });
    let sink_dyn: Arc<dyn Sink> = sink.clone();
    let queue = Arc::new(OverflowQueue::new(dir.path().join("q.json"), 1000));
    let delivery = Arc::new(Delivery::direct(sink_dyn, queue));
    let executor: Arc<dyn ProbeExecutor> = Arc::new(AlwaysDownExecutor);

    let cancel = CancellationToken::new();
    spawn_monitor_schedulers(agent(1), monitor(10, 1), schedule(5), executor, Arc::clone(&delivery), cancel.clone());

    tokio::time::advance(std::time::Duration::from_secs(5)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    assert_eq!(sink.delivered.load(Ordering::SeqCst), 1, "a failed probe still produces a delivered heartbeat");

    cancel.cancel();
}
