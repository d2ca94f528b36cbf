//! HTTP route handlers for the LiveMark server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `GET /events` - Server-sent change notifications with `Last-Event-ID` replay
//! - `POST /api/sessions` - Side-channel records from external tools
//! - `GET /api/files` - The current whitelist
//! - `POST /api/navigate` - Re-index a new root
//! - `POST /api/open` - Mark a document current and watch it
//! - `GET /api/raw` - Raw bytes of a whitelisted document
//! - `GET /health` - Health check endpoint
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use livemark_core::{Config, LiveMark};
//! use livemark_server::routes::{create_router, AppState};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let livemark = LiveMark::from_config(&Config::from_env()?)?;
//! livemark.start().await?;
//! let state = AppState::new(livemark, Duration::from_secs(15), CancellationToken::new());
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3737").await?;
//! axum::serve(listener, create_router(state)).await?;
//! # Ok(())
//! # }
//! ```

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream, StreamExt};
use livemark_core::{
    ChangeNotification, EventBus, EventRecord, LiveMark, SessionRecord, Subscription,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Maximum request body size for JSON endpoints (64 KB).
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Header a reconnecting SSE client uses to resume.
const LAST_EVENT_ID: &str = "last-event-id";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Core services.
    pub livemark: LiveMark,

    /// Interval between SSE keep-alive comments.
    pub keepalive: Duration,

    /// Cancelled on shutdown so open streams end and the server can drain.
    pub shutdown: CancellationToken,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(livemark: LiveMark, keepalive: Duration, shutdown: CancellationToken) -> Self {
        Self {
            livemark,
            keepalive,
            shutdown,
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(post_session))
        .route("/api/navigate", post(post_navigate))
        .route("/api/open", post(post_open))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .route("/events", get(get_events))
        .route("/api/files", get(get_files))
        .route("/api/raw", get(get_raw))
        .route("/health", get(get_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Parses a JSON body, mapping failures to `400 invalid_json`.
fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|err| {
        debug!(error = %err, "Rejected malformed JSON body");
        ApiError::bad_request(format!("invalid JSON body: {err}"), "invalid_json")
    })
}

/// Request body naming a single path.
#[derive(Debug, Deserialize)]
struct PathRequest {
    path: PathBuf,
}

// ============================================================================
// GET /events - Change stream
// ============================================================================

/// Owns a bus subscription for the lifetime of one SSE response.
///
/// Dropping it (client gone, stream finished) unsubscribes.
struct LiveStream {
    bus: Arc<EventBus>,
    subscription: Subscription,
    shutdown: CancellationToken,
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription.id());
    }
}

fn record_event(record: EventRecord) -> Event {
    Event::default()
        .id(record.id.to_string())
        .data(record.payload)
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(LAST_EVENT_ID)?.to_str().ok()?;
    match value.trim().parse() {
        Ok(id) => Some(id),
        Err(_) => {
            debug!(value, "Ignoring unparseable Last-Event-ID");
            None
        }
    }
}

/// GET /events - Subscribe to change notifications.
///
/// The stream opens with a `connection_status` frame naming the watched
/// root. When `Last-Event-ID` names a retained record, every later record is
/// replayed before live delivery starts; an unknown ID replays nothing.
async fn get_events(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let last_id = last_event_id(&headers);
    let bus = Arc::clone(&state.livemark.bus);
    let (replay, subscription) = bus.subscribe_from(last_id);

    let root = state
        .livemark
        .index
        .whitelist()
        .root_dir()
        .unwrap_or_else(|| state.livemark.boundary.root().to_path_buf());
    info!(
        subscriber = subscription.id(),
        last_event_id = ?last_id,
        replayed = replay.len(),
        "Event stream opened"
    );

    let mut opening: Vec<Result<Event, Infallible>> = Vec::with_capacity(replay.len() + 1);
    match serde_json::to_string(&ChangeNotification::connected(root.display().to_string())) {
        Ok(payload) => opening.push(Ok(Event::default().data(payload))),
        Err(err) => warn!(error = %err, "Failed to serialize connection status"),
    }
    opening.extend(replay.into_iter().map(|record| Ok(record_event(record))));

    let live = LiveStream {
        bus,
        subscription,
        shutdown: state.shutdown.clone(),
    };
    let live = stream::unfold(live, |mut live| async move {
        let record = tokio::select! {
            biased;
            () = live.shutdown.cancelled() => None,
            record = live.subscription.recv() => record,
        }?;
        Some((Ok::<_, Infallible>(record_event(record)), live))
    });

    Sse::new(stream::iter(opening).chain(live))
        .keep_alive(KeepAlive::new().interval(state.keepalive))
}

// ============================================================================
// POST /api/sessions - Side channel
// ============================================================================

/// POST /api/sessions - Record which external actor is touching a file.
///
/// The file need not exist yet; its path is resolved against the deepest
/// existing ancestor so it matches what the watcher later reports.
///
/// # Responses
///
/// - `202 Accepted` - Record stored
/// - `400 Bad Request` - Malformed JSON or empty `actorId`
/// - `403 Forbidden` - Path outside the boundary
async fn post_session(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let mut record: SessionRecord = parse_json(&body)?;
    if record.actor_id.trim().is_empty() {
        return Err(ApiError::bad_request(
            "actorId must not be empty",
            "invalid_record",
        ));
    }

    record.file_path = state.livemark.boundary.resolve_lenient(&record.file_path)?;
    debug!(
        path = %record.file_path.display(),
        actor = %record.actor_id,
        tool = ?record.tool_name,
        "Session record received"
    );
    state.livemark.correlator.register(record);

    Ok(StatusCode::ACCEPTED.into_response())
}

// ============================================================================
// Whitelist endpoints
// ============================================================================

/// Response body for `GET /api/files`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesResponse {
    pub root: Option<String>,
    pub files: Vec<String>,
    pub current_file: Option<String>,
}

/// GET /api/files - List whitelisted documents relative to the root.
async fn get_files(State(state): State<AppState>) -> Json<FilesResponse> {
    let snapshot = state.livemark.index.whitelist().snapshot();
    Json(FilesResponse {
        root: snapshot
            .root_dir
            .as_ref()
            .map(|root| root.display().to_string()),
        files: snapshot
            .files
            .iter()
            .map(|file| snapshot.display_path(file))
            .collect(),
        current_file: snapshot
            .current_file
            .as_ref()
            .map(|file| snapshot.display_path(file)),
    })
}

/// Response body for `POST /api/navigate`.
#[derive(Debug, Serialize, Deserialize)]
pub struct NavigateResponse {
    pub root: String,
    pub files: usize,
}

/// POST /api/navigate - Make a directory the indexed root.
///
/// Relative paths are taken from the current root. A navigation overtaken
/// by a newer one still answers `200`.
async fn post_navigate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<NavigateResponse>, ApiError> {
    let request: PathRequest = parse_json(&body)?;
    let root = state.livemark.index.navigate(&request.path).await?;

    Ok(Json(NavigateResponse {
        root: root.display().to_string(),
        files: state.livemark.index.whitelist().len(),
    }))
}

/// Response body for `POST /api/open`.
#[derive(Debug, Serialize, Deserialize)]
pub struct OpenResponse {
    pub path: String,
}

/// POST /api/open - Mark a whitelisted document current and watch it.
async fn post_open(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<OpenResponse>, ApiError> {
    let request: PathRequest = parse_json(&body)?;
    let index = &state.livemark.index;
    let document = index.open_file(&request.path).await?;

    Ok(Json(OpenResponse {
        path: index.whitelist().display_path(&document),
    }))
}

#[derive(Debug, Deserialize)]
struct RawQuery {
    path: PathBuf,
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("md" | "markdown") => "text/markdown; charset=utf-8",
        _ => "text/plain; charset=utf-8",
    }
}

/// GET /api/raw?path= - Serve a whitelisted document unmodified.
async fn get_raw(
    State(state): State<AppState>,
    Query(query): Query<RawQuery>,
) -> Result<Response, ApiError> {
    let document = state.livemark.index.resolve_document(&query.path)?;
    let bytes = tokio::fs::read(&document).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ApiError::not_found(format!("document disappeared: {}", document.display()))
        } else {
            ApiError::Internal(format!("failed to read {}: {err}", document.display()))
        }
    })?;

    Ok(([(header::CONTENT_TYPE, content_type(&document))], bytes).into_response())
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Number of open event streams.
    pub subscribers: usize,

    /// Number of whitelisted documents.
    pub files: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        subscribers: state.livemark.bus.subscriber_count(),
        files: state.livemark.index.whitelist().len(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
