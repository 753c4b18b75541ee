use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::payload::FormPayload;
use super::submit::SubmissionResponse;
use crate::error::ApiError;
use crate::mail::ContactMessage;
use crate::metrics;
use crate::security::{self, FormData};
use crate::AppState;

const REQUIRED_FIELDS: [&str; 4] = ["name", "email", "subject", "message"];
const THANK_YOU: &str = "Thank you for your message! We'll get back to you soon.";

/// Body accepted by `POST /contact`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ContactFormDescription {
    pub method: String,
    pub fields: Vec<String>,
    pub accepts: Vec<String>,
}

fn field(form: &FormData, name: &str) -> String {
    form.get(name)
        .and_then(Value::as_str)
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

/// Describe the contact form
#[utoipa::path(
    get,
    path = "/contact",
    tag = "relay",
    responses(
        (status = 200, description = "Fields expected by POST /contact", body = ContactFormDescription)
    )
)]
pub async fn contact_form() -> Json<ContactFormDescription> {
    Json(ContactFormDescription {
        method: "POST".to_string(),
        fields: REQUIRED_FIELDS.iter().map(|f| f.to_string()).collect(),
        accepts: vec![
            "application/x-www-form-urlencoded".to_string(),
            "application/json".to_string(),
        ],
    })
}

/// Submit the site contact form
///
/// All four fields are required. The message goes to the configured contact
/// recipient; without one it is only logged.
#[utoipa::path(
    post,
    path = "/contact",
    tag = "relay",
    request_body = ContactForm,
    responses(
        (status = 200, description = "Message accepted", body = SubmissionResponse),
        (status = 400, description = "Missing fields or invalid email", body = crate::error::ErrorBody),
        (status = 429, description = "Rate limit exceeded", body = crate::error::ErrorBody),
        (status = 500, description = "Delivery failed", body = crate::error::ErrorBody)
    )
)]
pub async fn submit_contact(
    State(state): State<AppState>,
    FormPayload(form): FormPayload,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let [name, email, subject, message] = REQUIRED_FIELDS.map(|name| field(&form, name));

    let missing: Vec<&'static str> = REQUIRED_FIELDS
        .iter()
        .zip([&name, &email, &subject, &message])
        .filter(|(_, value)| value.is_empty())
        .map(|(field, _)| *field)
        .collect();
    if !missing.is_empty() {
        metrics::record_submission("invalid");
        return Err(ApiError::MissingFields(missing));
    }

    let email = state.validate_email(&email).await.map_err(|e| {
        warn!(error = %e, "Contact form with invalid email");
        metrics::record_submission("invalid");
        ApiError::InvalidEmail
    })?;

    // Validation sees what the visitor typed; only the relayed text is stripped.
    let contact = ContactMessage {
        name: security::strip_tags(&name).into_owned(),
        email,
        subject: security::strip_tags(&subject).into_owned(),
        message: security::strip_tags(&message).into_owned(),
    };

    let Some(recipient) = state.contact_recipient.as_ref() else {
        info!(
            name = %contact.name,
            email = %contact.email,
            subject = %contact.subject,
            message = %contact.message,
            "Contact form submission"
        );
        metrics::record_submission("logged");
        return Ok(Json(SubmissionResponse::new("success", THANK_YOU)));
    };

    match state.mailer.send_contact(recipient, &contact).await {
        Ok(()) => {
            metrics::record_email("sent");
            metrics::record_submission("sent");
            info!(email = %contact.email, "Contact form relayed");
            Ok(Json(SubmissionResponse::new("success", THANK_YOU)))
        }
        Err(e) => {
            metrics::record_email("failed");
            metrics::record_submission("failed");
            error!(error = %e, "Error sending contact form");
            Err(ApiError::Delivery(e))
        }
    }
}
