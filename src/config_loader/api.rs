use super::{retry_load, ConfigLoader, CONFIG_FETCH_RETRIES};
use crate::error::ConfigError;
use crate::model::{
    Agent, ConfigSnapshot, Datacenter, HttpMethod, Monitor, Schedule, Thresholds,
};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;

pub struct ApiConfigLoader {
    client: Client,
    base_url: String,
    api_key: String,
    agent_id: i64,
}

impl ApiConfigLoader {
    pub fn new(client: Client, base_url: String, api_key: String, agent_id: i64) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            agent_id,
        }
    }
}

#[derive(Deserialize)]
struct ScheduleResponse {
    id: i64,
    name: String,
    interval: i64,
    #[serde(rename = "includeResponseBody")]
    include_response_body: bool,
    #[serde(rename = "thresholdsWarning")]
    thresholds_warning: i64,
    #[serde(rename = "thresholdsCritical")]
    thresholds_critical: i64,
}

#[derive(Deserialize)]
struct MonitorResponse {
    id: i64,
    name: String,
    method: String,
    #[serde(rename = "type")]
    monitor_type: String,
    url: String,
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
    #[serde(default)]
    body: Option<String>,
    schedule: ScheduleResponse,
}

fn parse_method(raw: &str) -> HttpMethod {
    match raw.to_uppercase().as_str() {
        "GET" => HttpMethod::Get,
        "HEAD" => HttpMethod::Head,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "PATCH" => HttpMethod::Patch,
        "DELETE" => HttpMethod::Delete,
        "OPTIONS" => HttpMethod::Options,
        _ => HttpMethod::Get,
    }
}

#[async_trait::async_trait]
impl ConfigLoader for ApiConfigLoader {
    async fn load(&self) -> Result<ConfigSnapshot, ConfigError> {
        retry_load(CONFIG_FETCH_RETRIES, || self.load_once()).await
    }
}

impl ApiConfigLoader {
    async fn load_once(&self) -> Result<ConfigSnapshot, ConfigError> {
        let url = format!(
            "{}/api/public/monitors?agentId={}",
            self.base_url, self.agent_id
        );
        let response = self
            .client
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;
        let monitors: Vec<MonitorResponse> = response.json().await?;

        // Reconstruct the unique set of schedules referenced by the returned
        // monitors, deduplicated by schedule id.
        let mut schedules_by_id: HashMap<i64, Schedule> = HashMap::new();
        let mut built_monitors = Vec::with_capacity(monitors.len());

        for m in monitors {
            schedules_by_id
                .entry(m.schedule.id)
                .or_insert_with(|| {
                    Schedule {
                        id: m.schedule.id,
                        name: m.schedule.name.clone(),
                        interval_s: m.schedule.interval.max(0) as u32,
                        include_response_body: m.schedule.include_response_body,
                        thresholds_warning_ms: m.schedule.thresholds_warning.max(0) as u32,
                        thresholds_critical_ms: m.schedule.thresholds_critical.max(0) as u32,
                        calls_per_interval: 1,
                    }
                    .normalized()
                });

            built_monitors.push(Monitor {
                id: m.id,
                name: m.name,
                method: parse_method(&m.method),
                monitor_type: m.monitor_type,
                url: m.url,
                additional_urls: Vec::new(),
                schedule_id: m.schedule.id,
                calls_per_interval: 0,
                headers: m.headers.unwrap_or_default(),
                body: m.body.unwrap_or_default(),
            });
        }

        let schedules: Vec<Schedule> = schedules_by_id.into_values().collect();

        let agent = Agent {
            id: self.agent_id,
            name: format!("agent-{}", self.agent_id),
            datacenter: Datacenter::default(),
            global_thresholds: Thresholds { warning_ms: 300, critical_ms: 800 },
            global_schedules: schedules.clone(),
            monitors: built_monitors,
        };

        Ok(ConfigSnapshot { schedules, agents: vec![agent] })
    }
}
