use axum::{extract::State, http::StatusCode};
use metrics::{counter, histogram, Counter, Histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

use crate::AppState;

pub struct HttpMetrics {
    pub requests_total: Counter,
    pub errors_5xx_total: Counter,
    pub latency_seconds: Histogram,
}

pub struct RelayMetrics {
    pub rate_limited_total: Counter,
}

pub static HTTP_METRICS: Lazy<HttpMetrics> = Lazy::new(|| HttpMetrics {
    requests_total: counter!("formsendr_http_requests_total"),
    errors_5xx_total: counter!("formsendr_http_5xx_total"),
    latency_seconds: histogram!("formsendr_http_latency_seconds"),
});

pub static RELAY_METRICS: Lazy<RelayMetrics> = Lazy::new(|| RelayMetrics {
    rate_limited_total: counter!("formsendr_rate_limited_total"),
});

pub fn record_http_request(status_code: u16, latency_seconds: f64) {
    HTTP_METRICS.requests_total.increment(1);
    HTTP_METRICS.latency_seconds.record(latency_seconds);

    if status_code >= 500 {
        HTTP_METRICS.errors_5xx_total.increment(1);
    }
}

/// `outcome`: sent, accepted, logged, invalid or failed.
pub fn record_submission(outcome: &'static str) {
    counter!("formsendr_submissions_total", "outcome" => outcome).increment(1);
}

/// `outcome`: sent or failed. Shutdown adds `abandoned`.
pub fn record_email(outcome: &'static str) {
    counter!("formsendr_emails_total", "outcome" => outcome).increment(1);
}

/// Background sends cut off by shutdown.
pub fn record_email_abandoned(count: usize) {
    counter!("formsendr_emails_total", "outcome" => "abandoned").increment(count as u64);
}

pub fn record_rate_limited() {
    RELAY_METRICS.rate_limited_total.increment(1);
}

/// Installs the global Prometheus recorder. The handle renders the
/// exposition text served at `/metrics`.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .ok_or(StatusCode::NOT_FOUND)
}
