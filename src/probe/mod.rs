//! Probe executor (C3): performs one HTTP request with per-phase timing (DNS, TCP, TLS,
//! TTFB) and produces one Heartbeat. Contract: `execute(agent, monitor, schedule) ->
//! Heartbeat` never fails to the caller — any failure is encoded into the returned
//! Heartbeat instead of propagated.

use crate::clock::ClockTrait;
use crate::error::ProbeError;
use crate::model::{Agent, Heartbeat, Monitor, Schedule};
use std::collections::HashMap;
use std::time::Duration;

#[async_trait::async_trait]
pub trait ProbeExecutor: Send + Sync {
    async fn execute(&self, agent: &Agent, monitor: &Monitor, schedule: &Schedule, url: &str) -> Heartbeat;
}

/// Phase timings extracted from one probe attempt, plus the response metadata needed
/// to finish building a Heartbeat. Phases not traversed (e.g. TLS on a plain-HTTP url)
/// remain 0, per the probe executor's contract in the component design.
#[derive(Debug, Clone, Default)]
pub struct ProbeOutcome {
    pub status_code: u16,
    pub dns_ms: i64,
    pub tcp_ms: i64,
    pub tls_ms: i64,
    pub ttfb_ms: i64,
    pub size_bytes: i64,
    pub response_headers: HashMap<String, String>,
    pub response_body: Option<String>,
}

/// Runs one probe at the transport level. Implemented for real use with libcurl
/// (`RealCurlRunner`) so DNS/TCP/TLS/TTFB phase timings are available via the handle's
/// timing introspection; swappable in tests for a fixed outcome or injected failure.
#[async_trait::async_trait]
pub trait CurlProbeRunner: Send + Sync {
    async fn run(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
        timeout_ms: u32,
        capture_body: bool,
    ) -> Result<ProbeOutcome, ProbeError>;
}

pub struct RealCurlRunner;

#[async_trait::async_trait]
impl CurlProbeRunner for RealCurlRunner {
    async fn run(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
        timeout_ms: u32,
        capture_body: bool,
    ) -> Result<ProbeOutcome, ProbeError> {
        let method = method.to_string();
        let url = url.to_string();
        let headers: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let body = body.to_vec();

        let result = tokio::task::spawn_blocking(move || -> Result<ProbeOutcome, ProbeError> {
            run_curl_blocking(&method, &url, &headers, &body, timeout_ms, capture_body)
        })
        .await
        .map_err(|e| ProbeError::Http(format!("curl task join failed: {e}")))??;

        Ok(result)
    }
}

fn run_curl_blocking(
    method: &str,
    url: &str,
    headers: &[(String, String)],
    body: &[u8],
    timeout_ms: u32,
    capture_body: bool,
) -> Result<ProbeOutcome, ProbeError> {
    use curl::easy::{Easy, List};
    use std::cell::RefCell;
    use std::rc::Rc;

    let mut handle = Easy::new();
    handle
        .url(url)
        .map_err(|e| ProbeError::Http(format!("invalid url: {e}")))?;

    match method {
        "GET" => {}
        "HEAD" => {
            handle
                .nobody(true)
                .map_err(|e| ProbeError::Http(e.to_string()))?;
        }
        "POST" => {
            handle
                .post(true)
                .map_err(|e| ProbeError::Http(e.to_string()))?;
            handle
                .post_fields_copy(body)
                .map_err(|e| ProbeError::Http(e.to_string()))?;
        }
        other => {
            handle
                .custom_request(other)
                .map_err(|e| ProbeError::Http(e.to_string()))?;
            if !body.is_empty() {
                handle
                    .post_fields_copy(body)
                    .map_err(|e| ProbeError::Http(e.to_string()))?;
            }
        }
    }

    handle
        .timeout(Duration::from_millis(timeout_ms as u64))
        .map_err(|e| ProbeError::Http(e.to_string()))?;

    let mut header_list = List::new();
    for (key, value) in headers {
        header_list
            .append(&format!("{key}: {value}"))
            .map_err(|e| ProbeError::Http(format!("header append failed: {e}")))?;
    }
    handle
        .http_headers(header_list)
        .map_err(|e| ProbeError::Http(e.to_string()))?;

    let body_buf: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let size_counter: Rc<RefCell<i64>> = Rc::new(RefCell::new(0));
    let response_headers: Rc<RefCell<HashMap<String, String>>> = Rc::new(RefCell::new(HashMap::new()));

    let transfer_err = {
        let mut transfer = handle.transfer();

        let body_buf_w = body_buf.clone();
        let size_counter_w = size_counter.clone();
        transfer
            .write_function(move |data| {
                *size_counter_w.borrow_mut() += data.len() as i64;
                if capture_body {
                    body_buf_w.borrow_mut().extend_from_slice(data);
                }
                Ok(data.len())
            })
            .map_err(|e| ProbeError::Http(e.to_string()))?;

        let response_headers_w = response_headers.clone();
        transfer
            .header_function(move |line| {
                if let Ok(text) = std::str::from_utf8(line) {
                    if let Some((name, value)) = text.split_once(':') {
                        let name = name.trim().to_string();
                        let value = value.trim().to_string();
                        if !name.is_empty() {
                            response_headers_w
                                .borrow_mut()
                                .entry(name)
                                .and_modify(|existing| {
                                    existing.push_str(", ");
                                    existing.push_str(&value);
                                })
                                .or_insert(value);
                        }
                    }
                }
                true
            })
            .map_err(|e| ProbeError::Http(e.to_string()))?;

        transfer.perform().err()
    };

    if let Some(e) = transfer_err {
        // `transfer` has been dropped, so `handle` is free again: a response code
        // already being set means the header phase completed and this failure
        // happened while reading the body, not while connecting.
        let headers_received = handle.response_code().map(|c| c > 0).unwrap_or(false);
        return Err(classify_curl_error(&e, headers_received));
    }

    let dns_time = handle.namelookup_time().map_err(|e| ProbeError::Http(e.to_string()))?.as_secs_f64();
    let connect_time = handle.connect_time().map_err(|e| ProbeError::Http(e.to_string()))?.as_secs_f64();
    let appconnect_time = handle.appconnect_time().map_err(|e| ProbeError::Http(e.to_string()))?.as_secs_f64();
    let starttransfer_time = handle.starttransfer_time().map_err(|e| ProbeError::Http(e.to_string()))?.as_secs_f64();
    let status_code = handle.response_code().map_err(|e| ProbeError::Http(e.to_string()))? as u16;
    let is_tls = url.starts_with("https://");

    let dns_ms = to_ms(dns_time);
    let tcp_ms = to_ms(connect_time - dns_time);
    let tls_ms = if is_tls { to_ms(appconnect_time - connect_time) } else { 0 };
    let ttfb_anchor = if is_tls { appconnect_time } else { connect_time };
    let ttfb_ms = to_ms(starttransfer_time - ttfb_anchor);

    let response_body = if capture_body {
        Some(String::from_utf8_lossy(&body_buf.borrow()).into_owned())
    } else {
        None
    };

    Ok(ProbeOutcome {
        status_code,
        dns_ms,
        tcp_ms,
        tls_ms,
        ttfb_ms,
        size_bytes: *size_counter.borrow(),
        response_headers: response_headers.borrow().clone(),
        response_body,
    })
}

fn to_ms(secs: f64) -> i64 {
    (secs.max(0.0) * 1000.0) as i64
}

/// `headers_received` distinguishes a transfer that never connected/completed the
/// response-header phase (connection-level failure) from one that did and then
/// failed partway through the body (a read failure), matching the distinct
/// `io.ReadAll` failure step in the original agent's probe loop.
fn classify_curl_error(e: &curl::Error, headers_received: bool) -> ProbeError {
    if e.is_operation_timedout() {
        ProbeError::Timeout(e.to_string())
    } else if e.is_couldnt_resolve_host() || e.is_couldnt_resolve_proxy() {
        ProbeError::Dns(e.to_string())
    } else if e.is_ssl_connect_error() || e.is_ssl_peer_certificate() || e.is_ssl_cacert() {
        ProbeError::Tls(e.to_string())
    } else if headers_received || e.is_partial_file() || e.is_recv_error() {
        ProbeError::Read(e.to_string())
    } else {
        ProbeError::Http(e.to_string())
    }
}

/// Production probe executor built on `CurlProbeRunner` and a `ClockTrait`.
pub struct HttpProbeExecutor {
    runner: Box<dyn CurlProbeRunner>,
    clock: Box<dyn ClockTrait>,
}

impl HttpProbeExecutor {
    pub fn new(runner: Box<dyn CurlProbeRunner>, clock: Box<dyn ClockTrait>) -> Self {
        Self { runner, clock }
    }

    pub fn production() -> Self {
        Self::new(Box::new(RealCurlRunner), Box::new(crate::clock::SystemClock))
    }
}

#[async_trait::async_trait]
impl ProbeExecutor for HttpProbeExecutor {
    async fn execute(&self, agent: &Agent, monitor: &Monitor, schedule: &Schedule, url: &str) -> Heartbeat {
        let executed_at = self.clock.utc_now();

        let mut request_headers: HashMap<String, String> = HashMap::new();
        request_headers.insert("User-Agent".to_string(), "CustomMonitor/1.0".to_string());
        for (k, v) in &monitor.headers {
            request_headers.insert(k.clone(), v.clone());
        }

        let timeout_ms = (schedule.interval_s as u64).saturating_mul(1000) as u32;
        let start = self.clock.now();

        let outcome = self
            .runner
            .run(
                monitor.method.as_str(),
                url,
                &request_headers,
                monitor.body.as_bytes(),
                timeout_ms,
                schedule.include_response_body,
            )
            .await;

        let response_time_ms = self.clock.now().duration_since(start).as_millis() as i64;

        match outcome {
            Err(probe_err) => Heartbeat {
                monitor_id: monitor.id,
                agent_id: agent.id,
                executed_at,
                success: false,
                error_type: Some(probe_err.error_type()),
                error_message: Some(probe_err.message()),
                dns_lookup_ms: 0,
                tcp_connect_ms: 0,
                tls_handshake_ms: 0,
                time_to_first_byte_ms: 0,
                response_time_ms,
                status_code: 0,
                size_bytes: 0,
                content_type: None,
                server: None,
                cache_status: None,
                warning_threshold_ms: schedule.thresholds_warning_ms,
                critical_threshold_ms: schedule.thresholds_critical_ms,
                raw_request_headers: request_headers,
                raw_response_headers: HashMap::new(),
                raw_response_body: None,
            },
            Ok(outcome) => {
                let success = (200..300).contains(&outcome.status_code);
                Heartbeat {
                    monitor_id: monitor.id,
                    agent_id: agent.id,
                    executed_at,
                    success,
                    error_type: if success { None } else { Some(crate::model::ErrorType::HttpError) },
                    error_message: if success {
                        None
                    } else {
                        Some(format!("unexpected status code {}", outcome.status_code))
                    },
                    dns_lookup_ms: outcome.dns_ms,
                    tcp_connect_ms: outcome.tcp_ms,
                    tls_handshake_ms: outcome.tls_ms,
                    time_to_first_byte_ms: outcome.ttfb_ms,
                    response_time_ms,
                    status_code: outcome.status_code,
                    size_bytes: outcome.size_bytes,
                    content_type: outcome.response_headers.get("Content-Type").cloned(),
                    server: outcome.response_headers.get("Server").cloned(),
                    cache_status: outcome.response_headers.get("CF-Cache-Status").cloned(),
                    warning_threshold_ms: schedule.thresholds_warning_ms,
                    critical_threshold_ms: schedule.thresholds_critical_ms,
                    raw_request_headers: request_headers,
                    raw_response_headers: outcome.response_headers,
                    raw_response_body: outcome.response_body,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Datacenter, HttpMethod, Region, Thresholds};
    use std::time::Instant;

    fn test_agent() -> Agent {
        Agent {
            id: 1,
            name: "test-agent".into(),
            datacenter: Datacenter::default(),
            global_thresholds: Thresholds { warning_ms: 300, critical_ms: 800 },
            global_schedules: vec![],
            monitors: vec![],
        }
    }

    fn test_monitor() -> Monitor {
        Monitor {
            id: 10,
            name: "ok".into(),
            method: HttpMethod::Get,
            monitor_type: "http".into(),
            url: "http://x/ok".into(),
            additional_urls: vec![],
            schedule_id: 1,
            calls_per_interval: 0,
            headers: HashMap::new(),
            body: String::new(),
        }
    }

    fn test_schedule() -> Schedule {
        Schedule {
            id: 1,
            name: "every-5s".into(),
            interval_s: 5,
            include_response_body: false,
            thresholds_warning_ms: 300,
            thresholds_critical_ms: 800,
            calls_per_interval: 1,
        }
        .normalized()
    }

    struct FixedClock;
    impl ClockTrait for FixedClock {
        fn now(&self) -> Instant {
            Instant::now()
        }
        fn utc_now(&self) -> chrono::DateTime<chrono::Utc> {
            chrono::Utc::now()
        }
    }

    struct StubRunner {
        outcome: Result<ProbeOutcome, ProbeError>,
    }

    #[async_trait::async_trait]
    impl CurlProbeRunner for StubRunner {
        async fn run(
            &self,
            _method: &str,
            _url: &str,
            _headers: &HashMap<String, String>,
            _body: &[u8],
            _timeout_ms: u32,
            _capture_body: bool,
        ) -> Result<ProbeOutcome, ProbeError> {
            self.outcome.clone()
        }
    }

    #[tokio::test]
    async fn success_heartbeat_satisfies_invariants() {
        let runner = StubRunner {
            outcome: Ok(ProbeOutcome {
                status_code: 200,
                dns_ms: 5,
                tcp_ms: 10,
                tls_ms: 0,
                ttfb_ms: 120,
                size_bytes: 42,
                response_headers: HashMap::from([("Content-Type".to_string(), "text/plain".to_string())]),
                response_body: None,
            }),
        };
        let executor = HttpProbeExecutor::new(Box::new(runner), Box::new(FixedClock));
        let agent = test_agent();
        let monitor = test_monitor();
        let schedule = test_schedule();

        let hb = executor.execute(&agent, &monitor, &schedule, &monitor.url).await;

        assert!(hb.success);
        assert_eq!(hb.status_code, 200);
        assert!(hb.error_type.is_none());
        assert_eq!(hb.content_type.as_deref(), Some("text/plain"));
        assert!(hb.invariants_hold());
    }

    #[tokio::test]
    async fn transport_failure_is_encoded_not_raised() {
        let runner = StubRunner {
            outcome: Err(ProbeError::Http("connection refused".into())),
        };
        let executor = HttpProbeExecutor::new(Box::new(runner), Box::new(FixedClock));
        let agent = test_agent();
        let monitor = test_monitor();
        let schedule = test_schedule();

        let hb = executor.execute(&agent, &monitor, &schedule, &monitor.url).await;

        assert!(!hb.success);
        assert_eq!(hb.status_code, 0);
        assert_eq!(hb.error_type, Some(crate::model::ErrorType::HttpError));
        assert!(hb.error_message.unwrap().contains("connection refused"));
        assert!(hb.invariants_hold());
    }

    #[test]
    fn classify_curl_error_reaches_every_error_type() {
        use crate::model::ErrorType;

        // CURLE_OPERATION_TIMEDOUT
        assert_eq!(classify_curl_error(&curl::Error::new(28), false).error_type(), ErrorType::Timeout);
        // CURLE_COULDNT_RESOLVE_HOST
        assert_eq!(classify_curl_error(&curl::Error::new(6), false).error_type(), ErrorType::DnsError);
        // CURLE_SSL_CONNECT_ERROR
        assert_eq!(classify_curl_error(&curl::Error::new(35), false).error_type(), ErrorType::TlsError);
        // CURLE_COULDNT_CONNECT, never reached the header phase
        assert_eq!(classify_curl_error(&curl::Error::new(7), false).error_type(), ErrorType::HttpError);
        // CURLE_PARTIAL_FILE: the transfer started but the body never completed
        assert_eq!(classify_curl_error(&curl::Error::new(18), false).error_type(), ErrorType::ReadError);
        // Any failure after headers were already received is a read failure too
        assert_eq!(classify_curl_error(&curl::Error::new(7), true).error_type(), ErrorType::ReadError);
    }
}
