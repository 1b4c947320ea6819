use super::{retry_load, ConfigLoader, CONFIG_FETCH_RETRIES};
use crate::error::ConfigError;
use crate::model::{
    Agent, ConfigSnapshot, Datacenter, HttpMethod, Monitor, Region, Schedule, Thresholds,
};
use deadpool_postgres::Pool;
use std::collections::HashMap;

/// Default global thresholds for DB-mode agents: the `agents` table carries no
/// thresholds columns of its own (per-schedule thresholds are the ones actually used
/// at probe time), so this stays a configured constant rather than a DB read.
const DEFAULT_GLOBAL_WARNING_MS: u32 = 300;
const DEFAULT_GLOBAL_CRITICAL_MS: u32 = 800;

pub struct DbConfigLoader {
    pool: Pool,
}

impl DbConfigLoader {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
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

/// Decodes the `headers::json` column into a string map. A NULL column yields an
/// empty map rather than being skipped (the previously-stubbed behavior this loader
/// replaces); a JSON object decodes key-by-key, a JSON string is tolerated as a
/// single-line "k: v" fallback.
fn decode_headers(raw: Option<serde_json::Value>) -> HashMap<String, String> {
    match raw {
        None | Some(serde_json::Value::Null) => HashMap::new(),
        Some(serde_json::Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| (k, value_as_string(v)))
            .collect(),
        Some(other) => {
            tracing::warn!(value = %other, "monitor headers column was not a JSON object, ignoring");
            HashMap::new()
        }
    }
}

fn value_as_string(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// `body::json` may be stored as a JSON string (the literal request body) or as
/// structured JSON (serialized back to its raw text); either way the Monitor's `body`
/// field is a plain string.
fn decode_body(raw: Option<serde_json::Value>) -> String {
    match raw {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

#[async_trait::async_trait]
impl ConfigLoader for DbConfigLoader {
    async fn load(&self) -> Result<ConfigSnapshot, ConfigError> {
        retry_load(CONFIG_FETCH_RETRIES, || self.load_once()).await
    }
}

impl DbConfigLoader {
    async fn load_once(&self) -> Result<ConfigSnapshot, ConfigError> {
        let client = self.pool.get().await?;

        let schedule_rows = client
            .query(
                "SELECT id, name, interval, include_response_body, thresholds_warning, thresholds_critical FROM schedules",
                &[],
            )
            .await?;
        let schedules: Vec<Schedule> = schedule_rows
            .iter()
            .map(|row| {
                Schedule {
                    id: row.get(0),
                    name: row.get(1),
                    interval_s: row.get::<_, i32>(2).max(0) as u32,
                    include_response_body: row.get(3),
                    thresholds_warning_ms: row.get::<_, i32>(4).max(0) as u32,
                    thresholds_critical_ms: row.get::<_, i32>(5).max(0) as u32,
                    calls_per_interval: 1,
                }
                .normalized()
            })
            .collect();

        let region_rows = client
            .query("SELECT id, name, region_code, group_name FROM regions", &[])
            .await?;
        let regions: HashMap<i64, Region> = region_rows
            .iter()
            .map(|row| {
                let id: i64 = row.get(0);
                (
                    id,
                    Region {
                        id,
                        name: row.get(1),
                        region_code: row.get(2),
                        group: row.get(3),
                    },
                )
            })
            .collect();

        let datacenter_rows = client
            .query("SELECT id, code, name, region_id FROM datacenters", &[])
            .await?;
        let datacenters: HashMap<i64, Datacenter> = datacenter_rows
            .iter()
            .map(|row| {
                let id: i64 = row.get(0);
                let region_id: i64 = row.get(3);
                (
                    id,
                    Datacenter {
                        id,
                        code: row.get(1),
                        name: row.get(2),
                        region: regions.get(&region_id).cloned().unwrap_or_default(),
                    },
                )
            })
            .collect();

        let agent_rows = client
            .query("SELECT id, name, datacenter_id FROM agents", &[])
            .await?;

        let mut agents = Vec::with_capacity(agent_rows.len());
        for row in &agent_rows {
            let id: i64 = row.get(0);
            let datacenter_id: i64 = row.get(2);
            let datacenter = datacenters.get(&datacenter_id).cloned().unwrap_or_default();

            let monitor_rows = client
                .query(
                    "SELECT m.id, m.name, m.method, m.type, m.url, m.schedule_id, m.headers, m.body \
                     FROM api_monitors m JOIN datacenter_monitors dm ON m.id = dm.monitor_id \
                     WHERE dm.datacenter_id = $1",
                    &[&datacenter_id],
                )
                .await?;

            let monitors: Vec<Monitor> = monitor_rows
                .iter()
                .map(|m| Monitor {
                    id: m.get(0),
                    name: m.get(1),
                    method: parse_method(m.get(2)),
                    monitor_type: m.get(3),
                    url: m.get(4),
                    additional_urls: Vec::new(),
                    schedule_id: m.get(5),
                    calls_per_interval: 0,
                    headers: decode_headers(m.get(6)),
                    body: decode_body(m.get(7)),
                })
                .collect();

            agents.push(Agent {
                id,
                name: row.get(1),
                datacenter,
                global_thresholds: Thresholds {
                    warning_ms: DEFAULT_GLOBAL_WARNING_MS,
                    critical_ms: DEFAULT_GLOBAL_CRITICAL_MS,
                },
                global_schedules: schedules.clone(),
                monitors,
            });
        }

        Ok(ConfigSnapshot { schedules, agents })
    }
}
