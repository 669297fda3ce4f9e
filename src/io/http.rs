//! HTTP API - call intake, status/event reads and Prometheus metrics
//!
//! Thin adapter over the dispatcher; no domain logic lives here. Uses
//! hyper for the HTTP server.
//!
//! Routes:
//! - POST /call               {"from": 2, "to": 9, "car": "car-1"?}
//! - GET  /status             all car snapshots
//! - GET  /status/{id}        one car snapshot
//! - GET  /events?car=&from_ts=&to_ts=
//! - POST /maintenance/{id}   take a car out of service
//! - POST /resume/{id}        return a car to service
//! - GET  /metrics            Prometheus text format
//! - GET  /health

use crate::domain::error::CallError;
use crate::domain::types::CarId;
use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::services::dispatcher::{DispatchError, Dispatcher};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
struct CallRequest {
    from: i32,
    to: i32,
    #[serde(default)]
    car: Option<String>,
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

fn error_response(err: &DispatchError) -> Response<Full<Bytes>> {
    let status = match err {
        DispatchError::Call(CallError::Validation(_)) => StatusCode::BAD_REQUEST,
        DispatchError::Call(CallError::CarUnavailable(_)) => StatusCode::CONFLICT,
        DispatchError::Store(_) | DispatchError::Log(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_response(status, serde_json::json!({ "error": err.to_string() }))
}

fn not_found() -> Response<Full<Bytes>> {
    json_response(StatusCode::NOT_FOUND, serde_json::json!({ "error": "not found" }))
}

/// Pull one value out of a query string like "car=car-1&from_ts=0"
fn query_param<'a>(query: Option<&'a str>, key: &str) -> Option<&'a str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

async fn handle_call(
    req: Request<hyper::body::Incoming>,
    dispatcher: Arc<Dispatcher>,
) -> Response<Full<Bytes>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "call_body_read_failed");
            return json_response(
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": "unreadable body" }),
            );
        }
    };

    let request: CallRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": format!("invalid call request: {e}") }),
            );
        }
    };

    let target = request.car.map(CarId::new);
    match dispatcher.call(request.from, request.to, target).await {
        Ok(car) => json_response(StatusCode::OK, serde_json::json!({ "car": car.as_str() })),
        Err(e) => error_response(&e),
    }
}

async fn handle_events(
    query: Option<&str>,
    dispatcher: Arc<Dispatcher>,
) -> Response<Full<Bytes>> {
    let car = query_param(query, "car").map(CarId::new);
    let from_ts = query_param(query, "from_ts").and_then(|v| v.parse::<u64>().ok());
    let to_ts = query_param(query, "to_ts").and_then(|v| v.parse::<u64>().ok());
    let range = match (from_ts, to_ts) {
        (None, None) => None,
        (from, to) => Some((from.unwrap_or(0), to.unwrap_or(u64::MAX))),
    };

    match dispatcher.events(car.as_ref(), range).await {
        Ok(events) => json_response(
            StatusCode::OK,
            serde_json::to_value(&events).unwrap_or_else(|_| serde_json::json!([])),
        ),
        Err(e) => error_response(&e),
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    // Owned copies so the request itself can be consumed by POST /call
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    let response = match (&method, path.as_str()) {
        (&Method::POST, "/call") => handle_call(req, dispatcher).await,
        (&Method::GET, "/status") => match dispatcher.status_all().await {
            Ok(cars) => json_response(
                StatusCode::OK,
                serde_json::to_value(&cars).unwrap_or_else(|_| serde_json::json!([])),
            ),
            Err(e) => error_response(&e),
        },
        (&Method::GET, "/events") => handle_events(query.as_deref(), dispatcher).await,
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics.report(), &site_id);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail")
        }
        (&Method::GET, "/health") => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail"),
        (&Method::GET, path) if path.starts_with("/status/") => {
            let id = CarId::new(path.trim_start_matches("/status/"));
            match dispatcher.status(&id).await {
                Ok(Some(car)) => json_response(
                    StatusCode::OK,
                    serde_json::to_value(&car).unwrap_or_else(|_| serde_json::json!({})),
                ),
                Ok(None) => not_found(),
                Err(e) => error_response(&e),
            }
        }
        (&Method::POST, path) if path.starts_with("/maintenance/") => {
            let id = CarId::new(path.trim_start_matches("/maintenance/"));
            match dispatcher.set_maintenance(&id).await {
                Ok(true) => json_response(StatusCode::OK, serde_json::json!({ "ok": true })),
                Ok(false) => not_found(),
                Err(e) => error_response(&e),
            }
        }
        (&Method::POST, path) if path.starts_with("/resume/") => {
            let id = CarId::new(path.trim_start_matches("/resume/"));
            match dispatcher.resume(&id).await {
                Ok(true) => json_response(StatusCode::OK, serde_json::json!({ "ok": true })),
                Ok(false) => not_found(),
                Err(e) => error_response(&e),
            }
        }
        _ => not_found(),
    };

    Ok(response)
}

/// Write a counter with site label in Prometheus text format
fn write_counter(output: &mut String, name: &str, help: &str, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn format_prometheus_metrics(summary: &MetricsSummary, site: &str) -> String {
    let mut output = String::with_capacity(2048);

    write_counter(&mut output, "liftbank_calls_total", "Calls accepted", site, summary.calls_total);
    write_counter(
        &mut output,
        "liftbank_calls_rejected_total",
        "Calls rejected by validation or unavailable cars",
        site,
        summary.calls_rejected,
    );
    write_counter(
        &mut output,
        "liftbank_jobs_started_total",
        "Movement jobs started",
        site,
        summary.jobs_started,
    );
    write_counter(
        &mut output,
        "liftbank_jobs_completed_total",
        "Movement jobs completed",
        site,
        summary.jobs_completed,
    );
    write_counter(
        &mut output,
        "liftbank_jobs_failed_total",
        "Movement jobs failed after exhausting retries",
        site,
        summary.jobs_failed,
    );
    write_counter(
        &mut output,
        "liftbank_jobs_superseded_total",
        "Waiting jobs superseded by newer submissions",
        site,
        summary.jobs_superseded,
    );
    write_counter(
        &mut output,
        "liftbank_movement_steps_total",
        "Single-floor movement steps persisted",
        site,
        summary.steps_total,
    );
    write_counter(
        &mut output,
        "liftbank_step_retries_total",
        "Step writes retried after transient failures",
        site,
        summary.step_retries,
    );
    write_counter(
        &mut output,
        "liftbank_door_cycles_total",
        "Completed door cycles",
        site,
        summary.door_cycles,
    );
    write_counter(
        &mut output,
        "liftbank_cars_provisioned_total",
        "Cars provisioned",
        site,
        summary.cars_provisioned,
    );

    let _ = writeln!(output, "# HELP liftbank_uptime_seconds Process uptime");
    let _ = writeln!(output, "# TYPE liftbank_uptime_seconds gauge");
    let _ = writeln!(output, "liftbank_uptime_seconds{{site=\"{site}\"}} {}", summary.uptime_secs);

    output
}

/// Start the HTTP API server
pub async fn start_http_server(
    port: u16,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let dispatcher = dispatcher.clone();
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let dispatcher = dispatcher.clone();
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, dispatcher, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                // A dropped sender counts as shutdown too
                if changed.is_err() || *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param() {
        let q = Some("car=car-1&from_ts=100&to_ts=200");
        assert_eq!(query_param(q, "car"), Some("car-1"));
        assert_eq!(query_param(q, "from_ts"), Some("100"));
        assert_eq!(query_param(q, "missing"), None);
        assert_eq!(query_param(None, "car"), None);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_call();
        metrics.record_step();
        metrics.record_step();

        let body = format_prometheus_metrics(&metrics.report(), "hq");
        assert!(body.contains("liftbank_calls_total{site=\"hq\"} 1"));
        assert!(body.contains("liftbank_movement_steps_total{site=\"hq\"} 2"));
        assert!(body.contains("# TYPE liftbank_jobs_failed_total counter"));
        assert!(body.contains("liftbank_uptime_seconds"));
    }

    #[test]
    fn test_call_request_parses_optional_car() {
        let r: CallRequest = serde_json::from_str(r#"{"from":2,"to":9}"#).unwrap();
        assert_eq!(r.from, 2);
        assert_eq!(r.car, None);

        let r: CallRequest =
            serde_json::from_str(r#"{"from":2,"to":9,"car":"car-3"}"#).unwrap();
        assert_eq!(r.car.as_deref(), Some("car-3"));
    }
}
