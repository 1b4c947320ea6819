//! Minimal `/healthz` and `/readyz` HTTP endpoints, implemented at their trivial
//! interface: `GET /healthz` always answers `200 ok`; `GET /readyz` answers `200
//! ready` if the most recent config load attempt succeeded (or none has been
//! attempted yet), `503` otherwise. Runs as its own task, independent of the
//! cancellation scope governing schedulers/collector, so health checks keep
//! answering through a collector restart.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new(initially_ready: bool) -> Self {
        Self(Arc::new(AtomicBool::new(initially_ready)))
    }

    pub fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Relaxed);
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

async fn handle(
    req: Request<hyper::body::Incoming>,
    readiness: Readiness,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/healthz" => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from_static(b"ok")))
            .unwrap(),
        "/readyz" => {
            if readiness.is_ready() {
                Response::builder()
                    .status(StatusCode::OK)
                    .body(Full::new(Bytes::from_static(b"ready")))
                    .unwrap()
            } else {
                Response::builder()
                    .status(StatusCode::SERVICE_UNAVAILABLE)
                    .body(Full::new(Bytes::from_static(b"api unavailable")))
                    .unwrap()
            }
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()))
            .unwrap(),
    };
    Ok(response)
}

pub fn spawn_health_server(port: u16, readiness: Readiness, cancel: CancellationToken) {
    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(%addr, error = %e, "failed to bind health server");
                return;
            }
        };
        info!(%addr, "health server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "health server accept failed");
                            continue;
                        }
                    };
                    let readiness = readiness.clone();
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req| handle(req, readiness.clone()));
                        if let Err(e) = hyper::server::conn::http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            warn!(error = %e, "health server connection error");
                        }
                    });
                }
                _ = cancel.cancelled() => {
                    info!("health server shutting down");
                    return;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn get(path: &str) -> Request<hyper::body::Incoming> {
        // `handle` only reads the URI, so an empty body stands in for a real
        // hyper::body::Incoming here.
        Request::builder().uri(path).body(()).unwrap().map(|_| unreachable!())
    }

    #[tokio::test]
    async fn healthz_is_always_ok_regardless_of_readiness() {
        let not_ready = Readiness::new(false);
        let response = handle(get("/healthz"), not_ready).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_is_ready_before_any_config_load_attempt() {
        // `Readiness::new(true)` is how main.rs initializes readiness before
        // bootstrap runs: no attempt has happened yet, so /readyz must say ready.
        let not_yet_attempted = Readiness::new(true);
        let response = handle(get("/readyz"), not_yet_attempted).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_is_unavailable_after_a_failed_load() {
        let readiness = Readiness::new(true);
        readiness.set(false);
        let response = handle(get("/readyz"), readiness).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn readyz_recovers_once_a_load_succeeds() {
        let readiness = Readiness::new(true);
        readiness.set(false);
        readiness.set(true);
        let response = handle(get("/readyz"), readiness).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ready");
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let response = handle(get("/nope"), Readiness::new(true)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
