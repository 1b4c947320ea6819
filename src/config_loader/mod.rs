//! Config loader (C2): fetches agents, datacenters, schedules, monitors from the
//! backend and normalizes them to a `ConfigSnapshot`.

pub mod api;
pub mod db;

use crate::error::ConfigError;
use crate::model::ConfigSnapshot;

#[async_trait::async_trait]
pub trait ConfigLoader: Send + Sync {
    async fn load(&self) -> Result<ConfigSnapshot, ConfigError>;
}

pub(crate) const CONFIG_FETCH_RETRIES: u32 = 5;

pub(crate) async fn retry_load<F, Fut>(max_attempts: u32, mut attempt: F) -> Result<ConfigSnapshot, ConfigError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<ConfigSnapshot, ConfigError>>,
{
    let mut wait = std::time::Duration::from_secs(2);
    let mut last_err = None;
    for try_n in 1..=max_attempts {
        match attempt().await {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) => {
                if try_n == max_attempts {
                    last_err = Some(e);
                    break;
                }
                tracing::warn!(attempt = try_n, max_attempts, error = %e, "config fetch failed, retrying");
                tokio::time::sleep(wait).await;
                wait = std::cmp::min(wait * 2, std::time::Duration::from_secs(60));
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}
