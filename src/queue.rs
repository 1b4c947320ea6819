//! Durable delivery queue (C5): at-least-once pipeline. A bounded, disk-persisted
//! overflow queue shared by both sink modes, plus an in-memory batch buffer used only
//! in batched (API) mode.

use crate::model::Heartbeat;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;
pub const DEFAULT_BATCH_CAPACITY: usize = 50;
pub const DEFAULT_BATCH_TIMER_SECS: u64 = 5;
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;

/// Bounded ordered sequence, FIFO semantics for draining, oldest-drop on overflow,
/// persisted atomically after every append and every successful drain.
pub struct OverflowQueue {
    inner: Mutex<Vec<Heartbeat>>,
    max_size: usize,
    path: PathBuf,
}

impl OverflowQueue {
    pub fn new(path: PathBuf, max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            max_size,
            path,
        }
    }

    /// `base` names a file stem to replace, not a directory to nest under — e.g.
    /// `./data/queue` + agent 7 becomes `./data/heartbeat_queue_agent_7.json`, matching
    /// the documented default path unconditionally, regardless of whether `base` has
    /// an extension.
    pub fn path_for_agent(base: &Path, agent_id: i64) -> PathBuf {
        base.with_file_name(format!("heartbeat_queue_agent_{agent_id}.json"))
    }

    /// Load the queue from disk on startup. A missing file is an empty queue; a
    /// corrupt file is logged and treated as empty — the corrupt file itself is left
    /// on disk rather than deleted.
    pub async fn load_from_disk(&self) {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read overflow queue file");
                return;
            }
        };

        match serde_json::from_slice::<Vec<Heartbeat>>(&data) {
            Ok(queue) => {
                let len = queue.len();
                *self.inner.lock().await = queue;
                if len > 0 {
                    tracing::info!(count = len, "loaded queued heartbeats from disk");
                }
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "failed to parse overflow queue file, starting empty");
            }
        }
    }

    /// Append a heartbeat, dropping the oldest entry if at capacity, then persist.
    /// The lock is held only for the in-memory mutation; disk I/O happens after release.
    pub async fn push(&self, hb: Heartbeat) {
        let snapshot = {
            let mut guard = self.inner.lock().await;
            if guard.len() >= self.max_size {
                warn!(max_size = self.max_size, "overflow queue full, dropping oldest heartbeat");
                guard.remove(0);
            }
            guard.push(hb);
            guard.clone()
        };
        self.persist(&snapshot).await;
    }

    /// Number of heartbeats currently queued.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Take a snapshot of the queue without clearing it (used for a flush attempt).
    pub async fn snapshot(&self) -> Vec<Heartbeat> {
        self.inner.lock().await.clone()
    }

    /// Clear the queue (called after a successful flush of `snapshot`) and persist the
    /// now-empty queue. If heartbeats were appended between `snapshot` and `clear`,
    /// they are preserved — only entries up to `snapshot_len` are dropped.
    pub async fn clear_up_to(&self, snapshot_len: usize) {
        let remaining = {
            let mut guard = self.inner.lock().await;
            if guard.len() <= snapshot_len {
                guard.clear();
            } else {
                guard.drain(0..snapshot_len);
            }
            guard.clone()
        };
        self.persist(&remaining).await;
    }

    async fn persist(&self, queue: &[Heartbeat]) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                error!(dir = %parent.display(), error = %e, "failed to create overflow queue directory");
                return;
            }
        }

        let data = match serde_json::to_vec_pretty(queue) {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, "failed to serialize overflow queue");
                return;
            }
        };

        let tmp_path = self.path.with_extension("tmp");
        if let Err(e) = tokio::fs::write(&tmp_path, &data).await {
            error!(path = %tmp_path.display(), error = %e, "failed to write overflow queue temp file");
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            error!(error = %e, "failed to rename overflow queue temp file");
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
    }
}

/// In-memory accumulator used only in batched (API) mode. Drained when either
/// capacity is reached or the batch timer fires; a failed batch moves wholesale into
/// the overflow queue.
pub struct BatchBuffer {
    inner: Mutex<Vec<Heartbeat>>,
    capacity: usize,
}

impl BatchBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Returns `Some(batch)` if appending this heartbeat reaches capacity and the
    /// buffer should be drained immediately.
    pub async fn push(&self, hb: Heartbeat) -> Option<Vec<Heartbeat>> {
        let mut guard = self.inner.lock().await;
        guard.push(hb);
        if guard.len() >= self.capacity {
            Some(std::mem::take(&mut *guard))
        } else {
            None
        }
    }

    /// Drain whatever is currently buffered (used by the batch timer).
    pub async fn drain(&self) -> Vec<Heartbeat> {
        let mut guard = self.inner.lock().await;
        std::mem::take(&mut *guard)
    }
}

pub type SharedOverflowQueue = Arc<OverflowQueue>;
pub type SharedBatchBuffer = Arc<BatchBuffer>;
