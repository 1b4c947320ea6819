//! Wires the Sink (C4) to the durable delivery queue (C5): direct-insert mode for the
//! database backend, batched mode for the HTTP API backend, plus the background batch
//! timer and overflow flusher tasks shared by both.

use crate::queue::{BatchBuffer, OverflowQueue, DEFAULT_BATCH_TIMER_SECS, DEFAULT_FLUSH_INTERVAL_SECS};
use crate::sink::Sink;
use crate::model::Heartbeat;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    Direct,
    Batched,
}

pub struct Delivery {
    mode: DeliveryMode,
    sink: Arc<dyn Sink>,
    queue: Arc<OverflowQueue>,
    batch: Option<Arc<BatchBuffer>>,
}

impl Delivery {
    pub fn direct(sink: Arc<dyn Sink>, queue: Arc<OverflowQueue>) -> Self {
        Self { mode: DeliveryMode::Direct, sink, queue, batch: None }
    }

    pub fn batched(sink: Arc<dyn Sink>, queue: Arc<OverflowQueue>, batch: Arc<BatchBuffer>) -> Self {
        Self { mode: DeliveryMode::Batched, sink, queue, batch: Some(batch) }
    }

    /// Called by every probe on completion, regardless of success/failure — a
    /// Heartbeat always reaches the delivery pipeline.
    pub async fn accept(&self, hb: Heartbeat) {
        match self.mode {
            DeliveryMode::Direct => {
                if let Err(e) = self.sink.submit_one(&hb).await {
                    warn!(monitor_id = hb.monitor_id, error = %e, "direct submit failed, queuing");
                    self.queue.push(hb).await;
                }
            }
            DeliveryMode::Batched => {
                let batch = self.batch.as_ref().expect("batched mode always has a buffer");
                if let Some(full_batch) = batch.push(hb).await {
                    self.submit_or_overflow(full_batch).await;
                }
            }
        }
    }

    async fn submit_or_overflow(&self, batch: Vec<Heartbeat>) {
        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.sink.submit_batch(&batch).await {
            warn!(count = batch.len(), error = %e, "batch submit failed, moving batch to overflow queue");
            for hb in batch {
                self.queue.push(hb).await;
            }
        }
    }

    /// Drains the batch buffer on a fixed timer (default 5s) even if it never reached
    /// capacity. No-op in direct mode.
    pub fn spawn_batch_timer(self: &Arc<Self>, cancel: CancellationToken) {
        if self.mode != DeliveryMode::Batched {
            return;
        }
        let delivery = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(DEFAULT_BATCH_TIMER_SECS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let batch = delivery.batch.as_ref().unwrap().drain().await;
                        delivery.submit_or_overflow(batch).await;
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }

    /// Background flusher: every 30s (and once more on shutdown) snapshots the
    /// overflow queue and attempts a batch submission, clearing on success.
    pub fn spawn_overflow_flusher(self: &Arc<Self>, cancel: CancellationToken) {
        let delivery = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => delivery.flush_once().await,
                    _ = cancel.cancelled() => {
                        delivery.flush_once().await;
                        break;
                    }
                }
            }
        });
    }

    async fn flush_once(&self) {
        let snapshot = self.queue.snapshot().await;
        if snapshot.is_empty() {
            return;
        }
        match self.sink.submit_batch(&snapshot).await {
            Ok(()) => {
                self.queue.clear_up_to(snapshot.len()).await;
                info!(count = snapshot.len(), "flushed overflow queue");
            }
            Err(e) => {
                warn!(error = %e, "overflow queue flush failed, will retry later");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::model::ErrorType;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn hb(monitor_id: i64) -> Heartbeat {
        Heartbeat {
            monitor_id,
            agent_id: 1,
            executed_at: chrono::Utc::now(),
            success: false,
            error_type: Some(ErrorType::HttpError),
            error_message: Some("down".into()),
            dns_lookup_ms: 0,
            tcp_connect_ms: 0,
            tls_handshake_ms: 0,
            time_to_first_byte_ms: 0,
            response_time_ms: 0,
            status_code: 0,
            size_bytes: 0,
            content_type: None,
            server: None,
            cache_status: None,
            warning_threshold_ms: 300,
            critical_threshold_ms: 800,
            raw_request_headers: HashMap::new(),
            raw_response_headers: HashMap::new(),
            raw_response_body: None,
        }
    }

    struct AlwaysFailsSink {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Sink for AlwaysFailsSink {
        async fn submit_one(&self, _hb: &Heartbeat) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::Transient("backend down".into()))
        }
        async fn submit_batch(&self, _hbs: &[Heartbeat]) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::Transient("backend down".into()))
        }
    }

    struct ToggleSink {
        up: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Sink for ToggleSink {
        async fn submit_one(&self, _hb: &Heartbeat) -> Result<(), SinkError> {
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(SinkError::Transient("down".into()))
            }
        }
        async fn submit_batch(&self, _hbs: &[Heartbeat]) -> Result<(), SinkError> {
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(SinkError::Transient("down".into()))
            }
        }
    }

    #[tokio::test]
    async fn direct_mode_queues_on_submit_failure() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(OverflowQueue::new(dir.path().join("q.json"), 10));
        let sink: Arc<dyn Sink> = Arc::new(AlwaysFailsSink { calls: AtomicUsize::new(0) });
        let delivery = Delivery::direct(sink, Arc::clone(&queue));

        delivery.accept(hb(1)).await;

        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn batched_mode_drains_full_batch_into_overflow_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(OverflowQueue::new(dir.path().join("q.json"), 10));
        let sink: Arc<dyn Sink> = Arc::new(AlwaysFailsSink { calls: AtomicUsize::new(0) });
        let batch = Arc::new(BatchBuffer::new(2));
        let delivery = Delivery::batched(sink, Arc::clone(&queue), batch);

        delivery.accept(hb(1)).await;
        assert_eq!(queue.len().await, 0, "buffer not yet at capacity");
        delivery.accept(hb(2)).await;

        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn flush_once_clears_queue_only_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(OverflowQueue::new(dir.path().join("q.json"), 10));
        queue.push(hb(1)).await;
        queue.push(hb(2)).await;

        let toggle = Arc::new(ToggleSink { up: AtomicBool::new(false) });
        let sink: Arc<dyn Sink> = toggle.clone();
        let delivery = Delivery::direct(sink, Arc::clone(&queue));

        delivery.flush_once().await;
        assert_eq!(queue.len().await, 2, "flush while backend is down leaves queue intact");

        toggle.up.store(true, Ordering::SeqCst);
        delivery.flush_once().await;
        assert_eq!(queue.len().await, 0, "flush once backend recovers drains the queue");
    }
}
