use anyhow::Context;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use novel_engine_admission::config::Settings;
use novel_engine_admission::core::{EvictionWorker, LimiterStats, RateLimiter};
use novel_engine_admission::middleware::AdmissionLayer;
use novel_engine_admission::utils::init_logging;

#[derive(Clone)]
struct AppState {
    limiter: Arc<RateLimiter>,
    metrics: PrometheusHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging().context("failed to initialise logging")?;
    tracing::info!("Starting admission service...");

    // Load configuration
    let settings = Settings::load().context("failed to load configuration")?;
    settings.validate().context("invalid configuration")?;
    tracing::info!(
        host = %settings.server.host,
        port = %settings.server.port,
        requests_per_minute = settings.rate_limit.requests_per_minute,
        adaptive = settings.rate_limit.adaptive_enabled,
        "Configuration loaded"
    );

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    let limiter = Arc::new(RateLimiter::from_settings(&settings).context("failed to build rate limiter")?);
    let eviction = EvictionWorker::spawn(Arc::clone(&limiter), settings.eviction.sweep_interval())
        .context("failed to start eviction worker")?;

    let state = AppState {
        limiter: Arc::clone(&limiter),
        metrics,
    };
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .route("/admin/limiter/stats", get(limiter_stats))
        .with_state(state)
        .layer(AdmissionLayer::new(limiter))
        .layer(TimeoutLayer::new(Duration::from_secs(
            settings.server.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("invalid server address")?;
    tracing::info!(%addr, "Listening");

    axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    eviction.shutdown().await.context("eviction worker failed")?;
    tracing::info!("Admission service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn render_metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

async fn limiter_stats(State(state): State<AppState>) -> Json<LimiterStats> {
    Json(state.limiter.stats())
}
