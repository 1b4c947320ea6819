//! Core data model: Region, Datacenter, Schedule, Monitor, Agent, ConfigSnapshot, Heartbeat.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Region {
    pub id: i64,
    pub name: String,
    pub region_code: String,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datacenter {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub region: Region,
}

impl Default for Datacenter {
    fn default() -> Self {
        Datacenter {
            id: 0,
            code: String::new(),
            name: String::new(),
            region: Region {
                id: 0,
                name: String::new(),
                region_code: String::new(),
                group: String::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    pub interval_s: u32,
    pub include_response_body: bool,
    pub thresholds_warning_ms: u32,
    pub thresholds_critical_ms: u32,
    pub calls_per_interval: u32,
}

impl Schedule {
    /// `interval_s >= 1`, `calls_per_interval >= 1`; callers construct from untrusted
    /// backend rows where either could be 0.
    pub fn normalized(mut self) -> Self {
        if self.interval_s < 1 {
            self.interval_s = 1;
        }
        if self.calls_per_interval < 1 {
            self.calls_per_interval = 1;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub name: String,
    pub method: HttpMethod,
    #[serde(rename = "type")]
    pub monitor_type: String,
    pub url: String,
    #[serde(default)]
    pub additional_urls: Vec<String>,
    pub schedule_id: i64,
    #[serde(default)]
    pub calls_per_interval: u32,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl Monitor {
    /// `{url} ∪ additional_urls`.
    pub fn effective_urls(&self) -> Vec<String> {
        let mut urls = Vec::with_capacity(1 + self.additional_urls.len());
        urls.push(self.url.clone());
        for u in &self.additional_urls {
            if !urls.contains(u) {
                urls.push(u.clone());
            }
        }
        urls
    }

    /// Monitor-level `calls_per_interval`, if > 0, overrides the schedule's.
    pub fn effective_calls_per_interval(&self, schedule: &Schedule) -> u32 {
        if self.calls_per_interval > 0 {
            self.calls_per_interval
        } else {
            schedule.calls_per_interval
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning_ms: u32,
    pub critical_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub name: String,
    pub datacenter: Datacenter,
    pub global_thresholds: Thresholds,
    pub global_schedules: Vec<Schedule>,
    pub monitors: Vec<Monitor>,
}

impl Agent {
    /// Invariant: every `monitor.schedule_id` resolves to exactly one entry in
    /// `global_schedules`. Monitors that fail to resolve are dropped with a warning
    /// by the caller rather than treated as a hard config error.
    pub fn schedule_for(&self, monitor: &Monitor) -> Option<&Schedule> {
        self.global_schedules
            .iter()
            .find(|s| s.id == monitor.schedule_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConfigSnapshot {
    pub schedules: Vec<Schedule>,
    pub agents: Vec<Agent>,
}

impl ConfigSnapshot {
    /// This deployment's agent, if the snapshot contains it.
    pub fn agent(&self, agent_id: i64) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == agent_id)
    }

    /// Order-insensitive set of monitor ids across all agents in the snapshot,
    /// used by the control loop to decide whether a reload requires a collector
    /// restart (unchanged set ⇒ no restart).
    pub fn monitor_ids(&self) -> std::collections::BTreeSet<i64> {
        self.agents
            .iter()
            .flat_map(|a| a.monitors.iter().map(|m| m.id))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorType {
    HttpError,
    ReadError,
    Timeout,
    DnsError,
    TlsError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::HttpError => "HTTP_ERROR",
            ErrorType::ReadError => "READ_ERROR",
            ErrorType::Timeout => "TIMEOUT",
            ErrorType::DnsError => "DNS_ERROR",
            ErrorType::TlsError => "TLS_ERROR",
        }
    }
}

/// One immutable record of one HTTP probe attempt. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub monitor_id: i64,
    pub agent_id: i64,
    pub executed_at: chrono::DateTime<chrono::Utc>,

    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub dns_lookup_ms: i64,
    pub tcp_connect_ms: i64,
    pub tls_handshake_ms: i64,
    pub time_to_first_byte_ms: i64,
    pub response_time_ms: i64,

    pub status_code: u16,
    pub size_bytes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_status: Option<String>,

    pub warning_threshold_ms: u32,
    pub critical_threshold_ms: u32,

    pub raw_request_headers: HashMap<String, String>,
    pub raw_response_headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response_body: Option<String>,
}

impl Heartbeat {
    /// `success ⇔ (error_type absent ∧ 200 ≤ status_code < 300)`.
    pub fn invariants_hold(&self) -> bool {
        let status_ok = (200..300).contains(&self.status_code);
        let success_consistent = self.success == (self.error_type.is_none() && status_ok);
        let timings_non_negative = self.dns_lookup_ms >= 0
            && self.tcp_connect_ms >= 0
            && self.tls_handshake_ms >= 0
            && self.time_to_first_byte_ms >= 0
            && self.response_time_ms >= 0;
        let response_time_covers_ttfb = self.time_to_first_byte_ms == 0
            || self.response_time_ms >= self.time_to_first_byte_ms;
        success_consistent && timings_non_negative && response_time_covers_ttfb
    }
}
