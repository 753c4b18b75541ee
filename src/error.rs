use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

use crate::mail::MailError;
use crate::security::FormError;

/// Errors surfaced to HTTP clients. The display text is the public message;
/// internal causes are only logged.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid recipient email address")]
    InvalidRecipient,
    #[error("Invalid form data")]
    InvalidForm(#[source] FormError),
    #[error("Please fill in all required fields.")]
    MissingFields(Vec<&'static str>),
    #[error("Please enter a valid email address.")]
    InvalidEmail,
    #[error("{message}")]
    BadRequestBody { status: StatusCode, message: String },
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited { retry_after: Duration },
    #[error("Failed to send email. Please try again later.")]
    Delivery(#[source] MailError),
    #[error("Page not found")]
    NotFound,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub status: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRecipient
            | ApiError::InvalidForm(_)
            | ApiError::MissingFields(_)
            | ApiError::InvalidEmail => StatusCode::BAD_REQUEST,
            ApiError::BadRequestBody { status, .. } => *status,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            ApiError::InvalidForm(err) => Some(serde_json::json!({ "form": err.to_string() })),
            ApiError::MissingFields(fields) => Some(serde_json::json!({ "missing": fields })),
            ApiError::RateLimited { retry_after } => {
                Some(serde_json::json!({ "retry_after_secs": retry_after_secs(*retry_after) }))
            }
            _ => None,
        }
    }
}

/// Whole seconds, rounded up so clients never retry early.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            status: "error".to_string(),
            error: self.to_string(),
            details: self.details(),
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after } = self {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(retry_after)),
            );
        }
        response
    }
}
