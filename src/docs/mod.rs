use axum::response::Json;
use utoipa::OpenApi;

use crate::routes::{contact, health, pages, submit};

#[derive(OpenApi)]
#[openapi(
    paths(
        pages::index,
        health::health,
        health::health_detailed,
        submit::submit_form,
        contact::contact_form,
        contact::submit_contact,
    ),
    components(
        schemas(
            pages::ServiceDescriptor,
            pages::EndpointInfo,
            health::HealthResponse,
            health::DetailedHealthResponse,
            health::MailStatus,
            health::RateLimitStatus,
            submit::SubmissionResponse,
            contact::ContactForm,
            contact::ContactFormDescription,
            crate::error::ErrorBody,
        )
    ),
    tags(
        (name = "service", description = "Service information"),
        (name = "health", description = "Health check endpoints"),
        (name = "relay", description = "Form-to-email relay endpoints"),
    ),
    info(
        title = "FormSendr API",
        description = "Validates, sanitizes and rate limits form submissions, then relays them as email",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT",
        ),
    ),
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
