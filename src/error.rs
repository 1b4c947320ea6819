//! Error taxonomy. Two families, matching the transient/probe-failure/config-unavailable/
//! fatal-bootstrap/leader-loss categories of the error handling design: `ConfigError` for
//! the loader and bootstrap path, `ProbeError` for the probe executor (never surfaced past
//! it — every variant is converted into a Heartbeat `error_type` instead of propagated).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed config payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("monitor {monitor_id} references unknown schedule {schedule_id}")]
    UnresolvedSchedule { monitor_id: i64, schedule_id: i64 },
}

impl ConfigError {
    /// Everything here is retried on the next reload tick except a missing
    /// required env var, which the control loop treats as fatal-bootstrap.
    pub fn is_fatal_bootstrap(&self) -> bool {
        matches!(self, ConfigError::MissingEnv(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("dns resolution failed: {0}")]
    Dns(String),

    #[error("tls handshake failed: {0}")]
    Tls(String),

    #[error("http transport error: {0}")]
    Http(String),

    #[error("failed to read response body: {0}")]
    Read(String),
}

impl ProbeError {
    pub fn error_type(&self) -> crate::model::ErrorType {
        use crate::model::ErrorType;
        match self {
            ProbeError::Timeout(_) => ErrorType::Timeout,
            ProbeError::Dns(_) => ErrorType::DnsError,
            ProbeError::Tls(_) => ErrorType::TlsError,
            ProbeError::Http(_) => ErrorType::HttpError,
            ProbeError::Read(_) => ErrorType::ReadError,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("fatal backend failure: {0}")]
    Fatal(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}
