use axum::{
    extract::{Request, State},
    http::{header, uri::Scheme, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::debug;

use crate::config::SecurityConfig;
use crate::AppState;

/// Paths served over plain HTTP even when HTTPS is forced, so load balancer
/// probes keep working.
const HTTPS_EXEMPT_PATHS: &[&str] = &["/health"];

/// Header values rendered once from `SecurityConfig`.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    force_https: bool,
    content_security_policy: HeaderValue,
    strict_transport_security: HeaderValue,
    frame_options: HeaderValue,
    referrer_policy: HeaderValue,
}

impl SecurityHeaders {
    pub fn from_config(config: &SecurityConfig) -> anyhow::Result<Self> {
        Ok(Self {
            force_https: config.force_https,
            content_security_policy: HeaderValue::from_str(
                &config.content_security_policy_header(),
            )?,
            strict_transport_security: HeaderValue::from_str(&format!(
                "max-age={}; includeSubDomains",
                config.hsts_max_age_seconds
            ))?,
            frame_options: HeaderValue::from_str(&config.frame_options)?,
            referrer_policy: HeaderValue::from_str(&config.referrer_policy)?,
        })
    }

    fn apply(&self, headers: &mut HeaderMap, secure: bool) {
        headers.insert(
            header::CONTENT_SECURITY_POLICY,
            self.content_security_policy.clone(),
        );
        headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        headers.insert(header::X_FRAME_OPTIONS, self.frame_options.clone());
        headers.insert(header::REFERRER_POLICY, self.referrer_policy.clone());
        if secure {
            headers.insert(
                header::STRICT_TRANSPORT_SECURITY,
                self.strict_transport_security.clone(),
            );
        }
    }
}

/// HTTPS as seen by the client. `X-Forwarded-Proto` only counts behind a
/// trusted proxy.
fn is_secure(request: &Request, trust_proxy_headers: bool) -> bool {
    if request.uri().scheme() == Some(&Scheme::HTTPS) {
        return true;
    }
    if !trust_proxy_headers {
        return false;
    }
    request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .map(|proto| proto.trim().eq_ignore_ascii_case("https"))
        .unwrap_or(false)
}

fn https_redirect(request: &Request) -> Response {
    let Some(host) = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
    else {
        return (StatusCode::BAD_REQUEST, "HTTPS required").into_response();
    };

    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    Redirect::temporary(&format!("https://{host}{path}")).into_response()
}

pub async fn security_headers_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let secure = is_secure(&request, state.config.server.trust_proxy_headers);
    let policy = &state.security_headers;

    let mut response = if policy.force_https
        && !secure
        && !HTTPS_EXEMPT_PATHS.contains(&request.uri().path())
    {
        debug!(path = %request.uri().path(), "Redirecting plain HTTP request");
        https_redirect(&request)
    } else {
        next.run(request).await
    };

    policy.apply(response.headers_mut(), secure);
    response
}
