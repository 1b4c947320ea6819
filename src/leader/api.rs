use super::LeaseProvider;
use reqwest::Client;
use serde::Deserialize;

/// HTTP lease provider: `acquire`/`release` endpoints exposing the same semantics as
/// the DB advisory lock, keyed by `agent_id`.
pub struct ApiLeaseProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ApiLeaseProvider {
    pub fn new(client: Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct AcquireResponse {
    acquired: bool,
}

fn acquire_url(base_url: &str, agent_id: i64) -> String {
    format!("{base_url}/api/public/agents/{agent_id}/lease/acquire")
}

fn release_url(base_url: &str, agent_id: i64) -> String {
    format!("{base_url}/api/public/agents/{agent_id}/lease/release")
}

#[async_trait::async_trait]
impl LeaseProvider for ApiLeaseProvider {
    async fn try_acquire(&self, agent_id: i64) -> Result<bool, String> {
        let url = acquire_url(&self.base_url, agent_id);
        let response = self
            .client
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("lease acquire returned {}", response.status()));
        }
        let body: AcquireResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(body.acquired)
    }

    async fn release(&self, agent_id: i64) -> Result<(), String> {
        let url = release_url(&self.base_url, agent_id);
        let response = self
            .client
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("lease release returned {}", response.status()));
        }
        Ok(())
    }

    fn idle_wait(&self) -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }
}
