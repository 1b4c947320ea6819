use super::Sink;
use crate::error::SinkError;
use crate::model::Heartbeat;
use deadpool_postgres::Pool;

/// Direct-insert sink for the database backend. Each Heartbeat is inserted
/// individually; `submit_batch` inserts each row in turn and fails fast on the first
/// error so the remaining rows stay in the overflow queue for the next attempt.
pub struct DbSink {
    pool: Pool,
}

impl DbSink {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

const INSERT_HEARTBEAT: &str = "
    INSERT INTO api_heartbeats (
        monitor_id, agent_id, executed_at, success, response_time_ms, response_size_bytes,
        response_status_code, response_content_type, response_server, response_cache_status,
        dns_lookup_ms, tcp_connect_ms, tls_handshake_ms, time_to_first_byte_ms,
        warning_threshold_ms, critical_threshold_ms, error_type, error_message,
        raw_request_headers, raw_response_headers, raw_response_body
    ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21)";

#[async_trait::async_trait]
impl Sink for DbSink {
    async fn submit_one(&self, hb: &Heartbeat) -> Result<(), SinkError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SinkError::Transient(format!("pool checkout failed: {e}")))?;

        let request_headers = serde_json::to_value(&hb.raw_request_headers)
            .map_err(|e| SinkError::Fatal(format!("failed to encode request headers: {e}")))?;
        let response_headers = serde_json::to_value(&hb.raw_response_headers)
            .map_err(|e| SinkError::Fatal(format!("failed to encode response headers: {e}")))?;

        client
            .execute(
                INSERT_HEARTBEAT,
                &[
                    &hb.monitor_id,
                    &hb.agent_id,
                    &hb.executed_at,
                    &hb.success,
                    &hb.response_time_ms,
                    &hb.size_bytes,
                    &(hb.status_code as i32),
                    &hb.content_type,
                    &hb.server,
                    &hb.cache_status,
                    &hb.dns_lookup_ms,
                    &hb.tcp_connect_ms,
                    &hb.tls_handshake_ms,
                    &hb.time_to_first_byte_ms,
                    &(hb.warning_threshold_ms as i32),
                    &(hb.critical_threshold_ms as i32),
                    &hb.error_type.map(|e| e.as_str()),
                    &hb.error_message,
                    &request_headers,
                    &response_headers,
                    &hb.raw_response_body,
                ],
            )
            .await
            .map_err(|e| SinkError::Transient(format!("insert heartbeat failed: {e}")))?;

        Ok(())
    }

    async fn submit_batch(&self, hbs: &[Heartbeat]) -> Result<(), SinkError> {
        for hb in hbs {
            self.submit_one(hb).await?;
        }
        Ok(())
    }
}
