//! Hand-rolled Prometheus text exposition: request counters, an in-flight
//! gauge and per-route latency sums.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::web::AppState;

#[derive(Debug, Default)]
struct RouteStats {
    count: u64,
    total_seconds: f64,
}

#[derive(Debug, Default)]
pub struct Metrics {
    in_flight: AtomicI64,
    requests: Mutex<BTreeMap<(String, u16), RouteStats>>,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_finished(&self, path: &str, status: u16, elapsed: Duration) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        let mut requests = self.requests.lock().expect("metrics lock poisoned");
        let stats = requests.entry((path.to_string(), status)).or_default();
        stats.count += 1;
        stats.total_seconds += elapsed.as_secs_f64();
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "# HELP http_server_in_flight_requests Requests currently being served."
        );
        let _ = writeln!(out, "# TYPE http_server_in_flight_requests gauge");
        let _ = writeln!(
            out,
            "http_server_in_flight_requests {}",
            self.in_flight.load(Ordering::Relaxed)
        );

        let requests = self.requests.lock().expect("metrics lock poisoned");
        let _ = writeln!(out, "# HELP http_server_requests_total Served requests.");
        let _ = writeln!(out, "# TYPE http_server_requests_total counter");
        for ((path, status), stats) in requests.iter() {
            let _ = writeln!(
                out,
                "http_server_requests_total{{path=\"{path}\",status=\"{status}\"}} {}",
                stats.count
            );
        }
        let _ = writeln!(
            out,
            "# HELP http_server_request_duration_seconds_sum Cumulative request latency."
        );
        let _ = writeln!(out, "# TYPE http_server_request_duration_seconds_sum counter");
        for ((path, status), stats) in requests.iter() {
            let _ = writeln!(
                out,
                "http_server_request_duration_seconds_sum{{path=\"{path}\",status=\"{status}\"}} {:.6}",
                stats.total_seconds
            );
        }
        out
    }
}

pub async fn serve_metrics(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}
