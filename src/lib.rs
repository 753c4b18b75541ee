use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use lettre::Address;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;

pub mod config;
pub mod docs;
pub mod error;
pub mod limiter;
pub mod mail;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;

use config::{AppConfig, CorsConfig};
use limiter::RateLimiter;
use mail::Mailer;
use security::deliverability::DeliverabilityChecker;
use security::EmailError;
use middleware::{
    logging::logging_middleware, rate_limit::rate_limit_middleware,
    security_headers::{security_headers_middleware, SecurityHeaders},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub mailer: Arc<Mailer>,
    pub limiter: Arc<RateLimiter>,
    pub security_headers: Arc<SecurityHeaders>,
    pub contact_recipient: Option<Address>,
    pub metrics: Option<PrometheusHandle>,
    pub deliverability: Option<Arc<DeliverabilityChecker>>,
    /// Background sends still in flight, drained on shutdown.
    pub background: TaskTracker,
}

impl AppState {
    pub fn new(config: AppConfig, metrics: Option<PrometheusHandle>) -> Result<Self> {
        let mailer = Mailer::from_config(&config.mail).context("failed to set up mail transport")?;
        Self::with_mailer(config, mailer, metrics)
    }

    /// Builds state around an existing mailer, e.g. a log transport.
    pub fn with_mailer(
        config: AppConfig,
        mailer: Mailer,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self> {
        let policy = config.rate_limit.policy()?;
        let security_headers = SecurityHeaders::from_config(&config.security)
            .context("invalid security header configuration")?;
        let contact_recipient = config
            .contact
            .recipient
            .as_deref()
            .map(security::validate_email)
            .transpose()
            .context("invalid contact recipient")?;
        let deliverability = if config.mail.check_deliverability {
            let timeout = Duration::from_secs(config.mail.dns_timeout_seconds);
            let checker = DeliverabilityChecker::from_system_conf(timeout)
                .context("failed to read system DNS configuration")?;
            Some(Arc::new(checker))
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            mailer: Arc::new(mailer),
            limiter: Arc::new(RateLimiter::new(policy)),
            security_headers: Arc::new(security_headers),
            contact_recipient,
            metrics,
            deliverability,
            background: TaskTracker::new(),
        })
    }

    /// Syntax check, then the DNS check when it is enabled.
    pub async fn validate_email(&self, raw: &str) -> Result<Address, EmailError> {
        let address = security::validate_email(raw)?;
        if let Some(checker) = &self.deliverability {
            checker.check(address.domain()).await?;
        }
        Ok(address)
    }

    /// Closes the background tracker and waits for running sends. Returns how
    /// many were still unfinished when `timeout` ran out.
    pub async fn drain_background(&self, timeout: Duration) -> usize {
        self.background.close();
        match tokio::time::timeout(timeout, self.background.wait()).await {
            Ok(()) => 0,
            Err(_) => self.background.len(),
        }
    }
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allow_origins
        .iter()
        .filter(|origin| origin.as_str() != "*")
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

pub fn create_app(state: AppState) -> Router {
    let config = state.config.clone();
    let rate_limit = from_fn_with_state(state.clone(), rate_limit_middleware);

    Router::new()
        .route("/", get(routes::pages::index))
        .route("/docs", get(docs::openapi_json))
        .route("/health", get(routes::health::health))
        .route("/api/v1/health", get(routes::health::health_detailed))
        .route(
            "/send/:recipient_email",
            post(routes::submit::submit_form).route_layer(rate_limit.clone()),
        )
        .route(
            "/contact",
            get(routes::contact::contact_form)
                .merge(post(routes::contact::submit_contact).route_layer(rate_limit)),
        )
        .route("/metrics", get(metrics::metrics_handler))
        .fallback(routes::pages::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn(logging_middleware))
                .layer(from_fn_with_state(state.clone(), security_headers_middleware))
                .layer(cors_layer(&config.cors))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.server.timeout_seconds,
                )))
                .layer(DefaultBodyLimit::max(config.server.max_body_bytes)),
        )
        .with_state(state)
}
