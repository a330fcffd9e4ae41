//! Public-facing gateway server.
//!
//! `POST /` answers with metadata, `POST /video` and `POST /audio` stream the
//! extractor's output as a chunked body. Runs on WEB_PORT (default 3000)
//! alongside the internal metrics server.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderValue, StatusCode, Version},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::metrics;
use crate::core::validation::{parse_download_request, HostAllowList};
use crate::download::coordinator::spawn_relay;
use crate::download::launcher::{ExtractionMode, Launcher};
use crate::download::metadata::{collect_metadata, MetadataLimits, MetadataRecord};
use crate::download::relay::{RelayLimits, ResponseSink};

/// Shared state for the gateway. Nothing in here is mutable; every request
/// gets its own process, sink and cancellation token.
pub struct AppState {
    pub launcher: Launcher,
    pub hosts: HostAllowList,
    pub relay_limits: RelayLimits,
    pub metadata_limits: MetadataLimits,
    /// Root token; each relay runs under a child of it
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn from_config(shutdown: CancellationToken) -> Self {
        Self {
            launcher: Launcher::from_config(),
            hosts: HostAllowList::from_config(),
            relay_limits: RelayLimits::from_config(),
            metadata_limits: MetadataLimits::from_config(),
            shutdown,
        }
    }
}

/// Build the gateway router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(metadata_handler))
        .route("/video", post(video_handler))
        .route("/audio", post(audio_handler))
        .route("/ping", get(ping_handler))
        .layer(RequestBodyLimitLayer::new(config::server::MAX_BODY_BYTES))
        .with_state(state)
}

/// Start the gateway and serve until the state's shutdown token is cancelled.
pub async fn start_web_server(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let shutdown = state.shutdown.clone();

    log::info!("Starting gateway on http://{}", addr);
    log::info!("  POST /       - Metadata (JSON)");
    log::info!("  POST /video  - Video stream (video/mp4)");
    log::info!("  POST /audio  - Audio stream (audio/mpeg)");
    log::info!("  GET  /ping   - Liveness");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    log::info!("Gateway stopped");
    Ok(())
}

/// Short id that tags every log line of one request.
fn request_label(mode: ExtractionMode) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", mode, &id[..8])
}

/// GET /ping
async fn ping_handler() -> &'static str {
    metrics::record_request("ping", 200);
    "pong"
}

/// POST / (metadata lookup)
async fn metadata_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let label = request_label(ExtractionMode::Metadata);
    let response = match fetch_metadata(&state, &body, &label).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => reject(&label, e),
    };
    metrics::record_request("metadata", response.status().as_u16());
    response
}

async fn fetch_metadata(state: &AppState, body: &[u8], label: &str) -> AppResult<MetadataRecord> {
    let request = parse_download_request(body, &state.hosts)?;
    log::info!("[{}] metadata requested: {}", label, request.url());

    let process = state.launcher.launch(&request, ExtractionMode::Metadata, label)?;

    // Dropping the collector on shutdown kills the process (kill_on_drop)
    tokio::select! {
        result = collect_metadata(process, state.metadata_limits) => result,
        _ = state.shutdown.cancelled() => Err(AppError::Io(std::io::Error::new(
            std::io::ErrorKind::Interrupted,
            "server shutting down",
        ))),
    }
}

/// POST /video
async fn video_handler(State(state): State<Arc<AppState>>, version: Version, body: Bytes) -> Response {
    stream_response(&state, ExtractionMode::Video, version, &body)
}

/// POST /audio
async fn audio_handler(State(state): State<Arc<AppState>>, version: Version, body: Bytes) -> Response {
    stream_response(&state, ExtractionMode::Audio, version, &body)
}

fn stream_response(state: &AppState, mode: ExtractionMode, version: Version, body: &[u8]) -> Response {
    let label = request_label(mode);
    let response = match start_relay(state, mode, version, body, &label) {
        Ok(response) => response,
        Err(e) => reject(&label, e),
    };
    metrics::record_request(mode.label(), response.status().as_u16());
    response
}

/// Validates, launches and hands the process to a relay task. Everything that
/// can still fail with a proper status happens here, before headers go out.
fn start_relay(
    state: &AppState,
    mode: ExtractionMode,
    version: Version,
    body: &[u8],
    label: &str,
) -> AppResult<Response> {
    let request = parse_download_request(body, &state.hosts)?;
    log::info!("[{}] {} requested: {} (quality {})", label, mode, request.url(), request.quality());

    let process = state.launcher.launch(&request, mode, label)?;
    let (sink, rx) = ResponseSink::channel(config::relay::BODY_CHANNEL_DEPTH);
    spawn_relay(process, sink, state.shutdown.child_token(), mode, state.relay_limits);

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(mode.content_type()));
    // Connection-specific header, not allowed on HTTP/2
    if version < Version::HTTP_2 {
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    }
    Ok(response)
}

fn reject(label: &str, error: AppError) -> Response {
    metrics::record_error(error.category());
    match error.status_code() {
        StatusCode::BAD_REQUEST => log::warn!("[{}] rejected: {}", label, error),
        _ => log::error!("[{}] {}", label, error),
    }
    error.into_response()
}
