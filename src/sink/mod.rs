//! Sink (C4): single or batch submission of Heartbeats to the backend. Abstracts two
//! backends behind a uniform interface; both report transient vs fatal failure
//! distinguishably (any non-2xx or network failure is treated as transient).

pub mod api;
pub mod db;

use crate::error::SinkError;
use crate::model::Heartbeat;

#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn submit_one(&self, hb: &Heartbeat) -> Result<(), SinkError>;
    async fn submit_batch(&self, hbs: &[Heartbeat]) -> Result<(), SinkError>;
}

/// Exponential backoff shared by both sink implementations: 2s initial, doubling,
/// capped at 60s, up to `max_attempts` tries. Returns the last error if all attempts
/// are exhausted.
pub(crate) async fn retry_with_backoff<F, Fut, T>(
    max_attempts: u32,
    mut attempt: F,
) -> Result<T, SinkError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, SinkError>>,
{
    let mut wait = std::time::Duration::from_secs(2);
    let mut last_err = None;
    for try_n in 1..=max_attempts {
        match attempt().await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if try_n == max_attempts {
                    last_err = Some(e);
                    break;
                }
                tracing::warn!(attempt = try_n, max_attempts, error = %e, "backend call failed, retrying");
                tokio::time::sleep(wait).await;
                wait = std::cmp::min(wait * 2, std::time::Duration::from_secs(60));
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| SinkError::Transient("retries exhausted".into())))
}
