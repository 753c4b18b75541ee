use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::header,
    Form, Json,
};
use serde_json::Value;

use crate::error::ApiError;
use crate::security::FormData;

/// Form fields from a url-encoded or JSON body.
///
/// Any other content type yields an empty form, which validation then
/// rejects. Repeated url-encoded keys keep their first value.
#[derive(Debug)]
pub struct FormPayload(pub FormData);

enum BodyKind {
    UrlEncoded,
    Json,
    Other,
}

fn body_kind(req: &Request) -> BodyKind {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if mime == "application/x-www-form-urlencoded" {
        BodyKind::UrlEncoded
    } else if mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json")) {
        BodyKind::Json
    } else {
        BodyKind::Other
    }
}

#[async_trait]
impl<S> FromRequest<S> for FormPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match body_kind(&req) {
            BodyKind::UrlEncoded => {
                let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                    .await
                    .map_err(|rejection| ApiError::BadRequestBody {
                        status: rejection.status(),
                        message: rejection.body_text(),
                    })?;

                let mut form = FormData::new();
                for (key, value) in pairs {
                    form.entry(key).or_insert(Value::String(value));
                }
                Ok(FormPayload(form))
            }
            BodyKind::Json => {
                let Json(value) = Json::<Value>::from_request(req, state)
                    .await
                    .map_err(|rejection| ApiError::BadRequestBody {
                        status: rejection.status(),
                        message: rejection.body_text(),
                    })?;

                match value {
                    Value::Object(form) => Ok(FormPayload(form)),
                    Value::Null => Ok(FormPayload(FormData::new())),
                    _ => Err(ApiError::BadRequestBody {
                        status: axum::http::StatusCode::BAD_REQUEST,
                        message: "JSON body must be an object".to_string(),
                    }),
                }
            }
            BodyKind::Other => Ok(FormPayload(FormData::new())),
        }
    }
}
