//! HTTP server for exposing Prometheus metrics
//!
//! Runs on a separate port from the gateway (METRICS_PORT, default 9090) so
//! scrapes and health checks never share the public listener.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Seconds after startup before /ready reports ready
const WARMUP_SECS: u64 = 2;

/// Application state for the metrics server
#[derive(Clone)]
struct MetricsState {
    start_time: Instant,
}

/// Build the metrics router
///
/// - /metrics - Prometheus metrics in text format
/// - /health - Liveness check
/// - /ready - Readiness check
pub fn metrics_router() -> Router {
    let state = MetricsState {
        start_time: Instant::now(),
    };

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(Arc::new(state))
}

/// Start the metrics HTTP server and serve until `shutdown` is cancelled
///
/// # Arguments
/// * `port` - Port to listen on (typically 9090)
pub async fn start_metrics_server(port: u16, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    log::info!("Starting metrics server on http://{}", addr);
    log::info!("  /metrics - Prometheus metrics");
    log::info!("  /health  - Health check (liveness)");
    log::info!("  /ready   - Readiness check");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, metrics_router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    log::info!("Metrics server stopped");
    Ok(())
}

/// Handler for /metrics endpoint
///
/// Returns Prometheus metrics in text exposition format
async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            log::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to encode metrics: {}", e)).into_response()
        }
    }
}

/// Handler for /health endpoint
///
/// Returns a simple health check response with uptime
async fn health_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed();

    let health_status = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": uptime.as_secs(),
        "uptime_human": format_duration(uptime),
        "service": "fetchgate",
        "version": env!("CARGO_PKG_VERSION"),
    });

    (StatusCode::OK, axum::Json(health_status))
}

/// Handler for /ready endpoint
///
/// Reports 503 during a short warmup window after startup
async fn ready_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed();

    if uptime.as_secs() < WARMUP_SECS {
        let status = serde_json::json!({
            "status": "starting",
            "uptime_seconds": uptime.as_secs(),
            "message": "Service is still initializing"
        });
        return (StatusCode::SERVICE_UNAVAILABLE, axum::Json(status));
    }

    let status = serde_json::json!({
        "status": "ready",
        "uptime_seconds": uptime.as_secs(),
    });

    (StatusCode::OK, axum::Json(status))
}

/// Format duration as human-readable string
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let days = total_secs / 86400;
    let hours = (total_secs % 86400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
