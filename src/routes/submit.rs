use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::payload::FormPayload;
use crate::error::ApiError;
use crate::metrics;
use crate::security;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmissionResponse {
    pub status: String,
    pub message: String,
}

impl SubmissionResponse {
    pub fn new(status: &str, message: &str) -> Self {
        Self {
            status: status.to_string(),
            message: message.to_string(),
        }
    }
}

/// Relay a form submission by email
///
/// Accepts `application/x-www-form-urlencoded` or a JSON object. Every field
/// is sanitized and forwarded to `recipient_email`.
#[utoipa::path(
    post,
    path = "/send/{recipient_email}",
    tag = "relay",
    params(
        ("recipient_email" = String, Path, description = "Address that receives the submission")
    ),
    responses(
        (status = 200, description = "Email sent", body = SubmissionResponse),
        (status = 202, description = "Email queued for background delivery", body = SubmissionResponse),
        (status = 400, description = "Invalid recipient or form data", body = crate::error::ErrorBody),
        (status = 429, description = "Rate limit exceeded", body = crate::error::ErrorBody),
        (status = 500, description = "Delivery failed", body = crate::error::ErrorBody)
    )
)]
pub async fn submit_form(
    State(state): State<AppState>,
    Path(recipient_email): Path<String>,
    FormPayload(form): FormPayload,
) -> Result<(StatusCode, Json<SubmissionResponse>), ApiError> {
    let recipient = state.validate_email(&recipient_email).await.map_err(|e| {
        warn!(recipient = %recipient_email, error = %e, "Invalid recipient email");
        metrics::record_submission("invalid");
        ApiError::InvalidRecipient
    })?;

    security::validate_form_data(&form, state.config.server.max_form_bytes).map_err(|e| {
        warn!(recipient = %recipient, error = %e, "Form validation failed");
        metrics::record_submission("invalid");
        ApiError::InvalidForm(e)
    })?;

    let form = security::sanitize_form(&form);

    if state.mailer.sends_in_background() {
        let mailer = state.mailer.clone();
        state.background.spawn(async move {
            match mailer.send_form_submission(&recipient, &form).await {
                Ok(()) => {
                    metrics::record_email("sent");
                    info!(recipient = %recipient, "Email sent successfully");
                }
                Err(e) => {
                    metrics::record_email("failed");
                    error!(recipient = %recipient, error = %e, "Background email delivery failed");
                }
            }
        });

        metrics::record_submission("accepted");
        return Ok((
            StatusCode::ACCEPTED,
            Json(SubmissionResponse::new("accepted", "Email is being sent")),
        ));
    }

    match state.mailer.send_form_submission(&recipient, &form).await {
        Ok(()) => {
            metrics::record_email("sent");
            metrics::record_submission("sent");
            info!(recipient = %recipient, "Email sent successfully");
            Ok((
                StatusCode::OK,
                Json(SubmissionResponse::new("success", "Email sent successfully")),
            ))
        }
        Err(e) => {
            metrics::record_email("failed");
            metrics::record_submission("failed");
            error!(recipient = %recipient, error = %e, "Failed to send email");
            Err(ApiError::Delivery(e))
        }
    }
}
