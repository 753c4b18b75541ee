use anyhow::Result;
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use formsendr::{config::AppConfig, create_app, metrics, AppState};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    info!(
        environment = %config.environment,
        mail_transport = config.mail.transport.as_str(),
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics(&config)?;
    let state = AppState::new(config, metrics_handle)?;

    spawn_maintenance(state.clone());

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(
        %addr,
        rate_limit = %state.limiter.policy(),
        send_in_background = state.mailer.sends_in_background(),
        "FormSendr listening"
    );

    let app = create_app(state.clone());
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let pending = state.background.len();
    if pending > 0 {
        info!(pending, "Waiting for background email sends");
    }
    let abandoned = state.drain_background(SHUTDOWN_DRAIN_TIMEOUT).await;
    if abandoned > 0 {
        warn!(abandoned, "Shutdown timed out with background email sends unfinished");
        metrics::record_email_abandoned(abandoned);
    }

    info!("Server stopped");
    Ok(())
}

fn init_tracing() -> Result<()> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    let subscriber = tracing_subscriber::registry().with(filter);

    match log_format.as_str() {
        "json" => subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
        _ => subscriber.with(tracing_subscriber::fmt::layer()).try_init()?,
    }

    Ok(())
}

fn init_metrics(config: &AppConfig) -> Result<Option<PrometheusHandle>> {
    if !config.metrics.enabled {
        return Ok(None);
    }

    let handle = metrics::install_recorder()?;
    info!("Metrics recorder installed, serving /metrics");
    Ok(Some(handle))
}

/// Periodically drops idle rate-limit windows and runs exporter upkeep.
fn spawn_maintenance(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            interval.tick().await;

            let removed = state.limiter.purge_expired();
            if removed > 0 {
                debug!(
                    removed,
                    tracked = state.limiter.tracked_clients(),
                    "Purged expired rate limit windows"
                );
            }

            if let Some(handle) = &state.metrics {
                handle.run_upkeep();
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
