use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::AppState;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct DetailedHealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
    pub environment: String,
    pub mail: MailStatus,
    pub rate_limit: RateLimitStatus,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct MailStatus {
    pub transport: String,
    pub sender: String,
    pub send_in_background: bool,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct RateLimitStatus {
    pub enabled: bool,
    pub policy: String,
    pub tracked_clients: usize,
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// Detailed health check
///
/// Reports the running configuration: mail transport, sender and the active
/// rate limit policy. Never contacts the SMTP server.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "health",
    responses(
        (status = 200, description = "Detailed health information", body = DetailedHealthResponse)
    )
)]
pub async fn health_detailed(State(state): State<AppState>) -> Json<DetailedHealthResponse> {
    debug!("Detailed health check requested");

    Json(DetailedHealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        environment: state.config.environment.to_string(),
        mail: MailStatus {
            transport: state.mailer.transport_name().to_string(),
            sender: state.mailer.sender().to_string(),
            send_in_background: state.mailer.sends_in_background(),
        },
        rate_limit: RateLimitStatus {
            enabled: state.config.rate_limit.enabled,
            policy: state.limiter.policy().to_string(),
            tracked_clients: state.limiter.tracked_clients(),
        },
    })
}
