use super::{db_idle_wait, LeaseProvider};
use deadpool_postgres::{Client, Pool};
use tokio::sync::Mutex;

/// Postgres advisory-lock lease provider. `pg_advisory_lock` is session-scoped, so the
/// same checked-out connection must be held between `try_acquire` and `release` —
/// acquiring on one connection and unlocking from another is a silent no-op. Losing
/// the held connection therefore also loses leadership, per the lease's documented
/// semantics.
pub struct DbLeaseProvider {
    pool: Pool,
    held: Mutex<Option<Client>>,
}

impl DbLeaseProvider {
    pub fn new(pool: Pool) -> Self {
        Self { pool, held: Mutex::new(None) }
    }
}

#[async_trait::async_trait]
impl LeaseProvider for DbLeaseProvider {
    async fn try_acquire(&self, agent_id: i64) -> Result<bool, String> {
        let client = self.pool.get().await.map_err(|e| e.to_string())?;
        let row = client
            .query_one("SELECT pg_try_advisory_lock($1)", &[&agent_id])
            .await
            .map_err(|e| e.to_string())?;
        let acquired: bool = row.get(0);
        if acquired {
            *self.held.lock().await = Some(client);
        }
        Ok(acquired)
    }

    async fn release(&self, agent_id: i64) -> Result<(), String> {
        let client = self.held.lock().await.take();
        if let Some(client) = client {
            client
                .execute("SELECT pg_advisory_unlock($1)", &[&agent_id])
                .await
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    fn idle_wait(&self) -> std::time::Duration {
        db_idle_wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_wait_is_sixty_seconds_plus_up_to_ten_seconds_of_jitter() {
        for _ in 0..50 {
            let wait = db_idle_wait();
            assert!(wait >= std::time::Duration::from_secs(60));
            assert!(wait < std::time::Duration::from_secs(71));
        }
    }
}
