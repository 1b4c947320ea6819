use super::{retry_with_backoff, Sink};
use crate::error::SinkError;
use crate::model::Heartbeat;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;

const SUBMIT_RETRIES: u32 = 3;

/// Batched (HTTP API) backend sink. `submit_one` and `submit_batch` each retry
/// internally with exponential backoff (2s doubling, capped at 60s) up to 3 attempts,
/// per the concurrency model's backend-submission retry policy.
pub struct ApiSink {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ApiSink {
    pub fn new(client: Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn heartbeat_request(&self, hb: &Heartbeat) -> HeartbeatRequest {
        HeartbeatRequest {
            monitor: IdRef { id: hb.monitor_id },
            agent: IdRef { id: hb.agent_id },
            executed_at: hb.executed_at.to_rfc3339(),
            success: hb.success,
            response_time_ms: hb.response_time_ms,
            response_size_bytes: hb.size_bytes,
            response_status_code: hb.status_code,
            response_content_type: hb.content_type.clone(),
            response_server: hb.server.clone(),
            response_cache_status: hb.cache_status.clone(),
            dns_lookup_ms: hb.dns_lookup_ms,
            tcp_connect_ms: hb.tcp_connect_ms,
            tls_handshake_ms: hb.tls_handshake_ms,
            time_to_first_byte_ms: hb.time_to_first_byte_ms,
            warning_threshold_ms: hb.warning_threshold_ms,
            critical_threshold_ms: hb.critical_threshold_ms,
            error_type: hb.error_type.map(|e| e.as_str().to_string()),
            error_message: hb.error_message.clone(),
            raw_request_headers: hb.raw_request_headers.clone(),
            raw_response_headers: hb.raw_response_headers.clone(),
            raw_response_body: hb.raw_response_body.clone(),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), SinkError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SinkError::Transient(format!("request failed: {e}")))?;

        classify_status(response.status())
    }
}

/// Any non-2xx status is transient, per the sink's documented contract — a single
/// misbehaving heartbeat submission is never worth giving up on permanently.
fn classify_status(status: reqwest::StatusCode) -> Result<(), SinkError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(SinkError::Transient(format!("backend returned {status}")))
    }
}

#[async_trait::async_trait]
impl Sink for ApiSink {
    async fn submit_one(&self, hb: &Heartbeat) -> Result<(), SinkError> {
        let body = json!(self.heartbeat_request(hb));
        retry_with_backoff(SUBMIT_RETRIES, || self.post("/api/public/heartbeats", body.clone())).await
    }

    async fn submit_batch(&self, hbs: &[Heartbeat]) -> Result<(), SinkError> {
        let body: Vec<HeartbeatRequest> = hbs.iter().map(|hb| self.heartbeat_request(hb)).collect();
        let body = json!(body);
        retry_with_backoff(SUBMIT_RETRIES, || self.post("/api/public/heartbeats/batch", body.clone())).await
    }
}

#[derive(Serialize)]
struct IdRef {
    id: i64,
}

#[derive(Serialize)]
struct HeartbeatRequest {
    monitor: IdRef,
    agent: IdRef,
    #[serde(rename = "executedAt")]
    executed_at: String,
    success: bool,
    #[serde(rename = "responseTimeMs")]
    response_time_ms: i64,
    #[serde(rename = "responseSizeBytes")]
    response_size_bytes: i64,
    #[serde(rename = "responseStatusCode")]
    response_status_code: u16,
    #[serde(rename = "responseContentType", skip_serializing_if = "Option::is_none")]
    response_content_type: Option<String>,
    #[serde(rename = "responseServer", skip_serializing_if = "Option::is_none")]
    response_server: Option<String>,
    #[serde(rename = "responseCacheStatus", skip_serializing_if = "Option::is_none")]
    response_cache_status: Option<String>,
    #[serde(rename = "dnsLookupMs")]
    dns_lookup_ms: i64,
    #[serde(rename = "tcpConnectMs")]
    tcp_connect_ms: i64,
    #[serde(rename = "tlsHandshakeMs")]
    tls_handshake_ms: i64,
    #[serde(rename = "timeToFirstByteMs")]
    time_to_first_byte_ms: i64,
    #[serde(rename = "warningThresholdMs")]
    warning_threshold_ms: u32,
    #[serde(rename = "criticalThresholdMs")]
    critical_threshold_ms: u32,
    #[serde(rename = "errorType", skip_serializing_if = "Option::is_none")]
    error_type: Option<String>,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(rename = "rawRequestHeaders")]
    raw_request_headers: std::collections::HashMap<String, String>,
    #[serde(rename = "rawResponseHeaders")]
    raw_response_headers: std::collections::HashMap<String, String>,
    #[serde(rename = "rawResponseBody", skip_serializing_if = "Option::is_none")]
    raw_response_body: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_statuses_classify_as_ok() {
        assert!(classify_status(reqwest::StatusCode::OK).is_ok());
        assert!(classify_status(reqwest::StatusCode::CREATED).is_ok());
    }

    #[test]
    fn every_non_2xx_status_classifies_as_transient() {
        let statuses = [
            reqwest::StatusCode::BAD_REQUEST,
            reqwest::StatusCode::UNAUTHORIZED,
            reqwest::StatusCode::FORBIDDEN,
            reqwest::StatusCode::NOT_FOUND,
            reqwest::StatusCode::UNPROCESSABLE_ENTITY,
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            reqwest::StatusCode::REQUEST_TIMEOUT,
        ];
        for status in statuses {
            match classify_status(status) {
                Err(SinkError::Transient(_)) => {}
                other => panic!("expected Transient for {status}, got {other:?}"),
            }
        }
    }
}
