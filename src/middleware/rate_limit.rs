use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::warn;

use crate::error::{retry_after_secs, ApiError};
use crate::limiter::RateLimitDecision;
use crate::{metrics, AppState};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Address the limiter keys on. Falls back to loopback when the server was
/// started without connect info.
pub fn client_ip(request: &Request, trust_proxy_headers: bool) -> IpAddr {
    if trust_proxy_headers {
        if let Some(ip) = forwarded_for(request.headers()) {
            return ip;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(X_FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.rate_limit.enabled {
        return next.run(request).await;
    }

    let client = client_ip(&request, state.config.server.trust_proxy_headers);

    match state.limiter.check(client) {
        RateLimitDecision::Allowed {
            limit,
            remaining,
            reset_in,
        } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
            headers.insert(
                X_RATELIMIT_RESET,
                HeaderValue::from(retry_after_secs(reset_in)),
            );
            response
        }
        RateLimitDecision::Limited { quota, retry_after } => {
            warn!(
                %client,
                %quota,
                path = %request.uri().path(),
                retry_after_secs = retry_after_secs(retry_after),
                "Rate limit exceeded"
            );
            metrics::record_rate_limited();

            let mut response = ApiError::RateLimited { retry_after }.into_response();
            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u32));
            headers.insert(
                X_RATELIMIT_RESET,
                HeaderValue::from(retry_after_secs(retry_after)),
            );
            response
        }
    }
}
