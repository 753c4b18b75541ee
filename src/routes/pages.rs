use axum::response::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceDescriptor {
    pub service: String,
    pub version: String,
    pub description: String,
    pub endpoints: Vec<EndpointInfo>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EndpointInfo {
    pub method: String,
    pub path: String,
    pub description: String,
}

const ENDPOINTS: &[(&str, &str, &str)] = &[
    ("POST", "/send/{recipient_email}", "Relay a form submission to the given address"),
    ("GET", "/contact", "Describe the contact form"),
    ("POST", "/contact", "Submit the site contact form"),
    ("GET", "/health", "Liveness probe"),
    ("GET", "/api/v1/health", "Detailed health information"),
    ("GET", "/docs", "OpenAPI document"),
    ("GET", "/metrics", "Prometheus metrics"),
];

/// Service landing document
#[utoipa::path(
    get,
    path = "/",
    tag = "service",
    responses(
        (status = 200, description = "Service name, version and endpoints", body = ServiceDescriptor)
    )
)]
pub async fn index() -> Json<ServiceDescriptor> {
    Json(ServiceDescriptor {
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: env!("CARGO_PKG_DESCRIPTION").to_string(),
        endpoints: ENDPOINTS
            .iter()
            .map(|(method, path, description)| EndpointInfo {
                method: method.to_string(),
                path: path.to_string(),
                description: description.to_string(),
            })
            .collect(),
    })
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
