//! HTTP routes
//!
//! ```text
//!  GET    /                 viewer page
//!  GET    /video_feed       MJPEG stream            ?camera=
//!  GET    /ws               WebSocket frame stream  ?camera=
//!  POST   /offer            SDP offer -> answer
//!  POST   /detect           annotate one uploaded image or video
//!  GET    /health           liveness
//!  GET    /sessions         live sessions
//!  DELETE /sessions/:id     stop a session
//!  GET    /stats            server counters
//! ```
//!
//! Streaming handlers register the session before opening the camera, so a
//! full server answers 503 without touching the device.

use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::error::ApiError;
use super::state::AppState;
use crate::batch::{UploadKind, OUTPUT_FILENAME};
use crate::registry::{SessionDescriptor, SessionId, SessionInfo};
use crate::signaling::{AnswerResponse, OfferRequest};
use crate::sink::{mjpeg, watch_disconnect, SocketSink, TransportKind};
use crate::stats::ServerStats;

const VIEWER_HTML: &str = include_str!("viewer.html");

/// Multipart field holding the upload
const UPLOAD_FIELD: &str = "file";

/// Camera selection for MJPEG and socket viewers
#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    pub camera: Option<String>,
}

/// Build the HTTP router
pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/", get(viewer))
        .route("/video_feed", get(video_feed))
        .route("/ws", get(socket_feed))
        .route("/offer", post(offer))
        .route(
            "/detect",
            post(detect).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id", delete(stop_session))
        .route("/stats", get(stats))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn viewer() -> Html<&'static str> {
    Html(VIEWER_HTML)
}

async fn health() -> &'static str {
    "ok"
}

/// `GET /video_feed`
pub async fn video_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Response, ApiError> {
    let spec = state.feed_camera(query.camera.as_deref())?;
    let guard = state
        .launcher
        .register(SessionDescriptor::new(TransportKind::Mjpeg, spec.to_string()).peer(peer))?;
    let source = state.launcher.acquire(&spec).await?;

    let (sink, stream) = mjpeg::channel(state.config.mjpeg_capacity, state.mjpeg_encoder);
    let session_id = guard.id();
    state.launcher.launch(guard, source, Box::new(sink));

    tracing::info!(session_id = session_id, peer = %peer, source = %spec, "MJPEG viewer connected");
    Ok(stream.into_response())
}

/// `GET /ws`
///
/// The session slot and the camera are claimed before the upgrade; the
/// session starts once the socket is open.
pub async fn socket_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let spec = state.feed_camera(query.camera.as_deref())?;
    let guard = state
        .launcher
        .register(SessionDescriptor::new(TransportKind::Socket, spec.to_string()).peer(peer))?;
    let source = state.launcher.acquire(&spec).await?;

    let launcher = state.launcher.clone();
    let encoder = state.socket_encoder;
    Ok(ws.on_upgrade(move |socket| async move {
        let (outbound, inbound) = socket.split();
        let (gone, watcher) = watch_disconnect(inbound);
        let sink = SocketSink::new(outbound, encoder, gone).with_watcher(watcher);

        let session_id = guard.id();
        launcher.launch(guard, source, Box::new(sink));
        tracing::info!(session_id = session_id, peer = %peer, source = %spec, "Socket viewer connected");
    }))
}

/// `POST /offer`
pub async fn offer(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Result<Json<OfferRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let Json(offer) = body?;
    let answer = state.signaling.negotiate(offer, Some(peer)).await?;
    Ok(Json(answer))
}

/// `POST /detect`
pub async fn detect(State(state): State<AppState>, mut multipart: Multipart) -> Result<Response, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let data: Bytes = field.bytes().await?;
        let kind = UploadKind::classify(&filename, content_type.as_deref());

        tracing::info!(
            filename = %filename,
            kind = ?kind,
            bytes = data.len(),
            "Batch upload received"
        );

        return match kind {
            UploadKind::Image => {
                let jpeg = state.batch.annotate_image(data).await?;
                Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
            }
            UploadKind::Video => {
                let clip = state.batch.annotate_video(data, &filename).await?;
                let disposition = format!("attachment; filename=\"{}\"", OUTPUT_FILENAME);
                Ok((
                    [
                        (header::CONTENT_TYPE, "video/mp4".to_string()),
                        (header::CONTENT_DISPOSITION, disposition),
                    ],
                    clip,
                )
                    .into_response())
            }
        };
    }

    Err(ApiError::BadRequest(format!(
        "multipart field '{}' is missing",
        UPLOAD_FIELD
    )))
}

/// `GET /sessions`
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    let mut sessions = state.registry().list();
    sessions.sort_by_key(|info| info.id);
    Json(sessions)
}

/// `DELETE /sessions/:id`
pub async fn stop_session(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<StatusCode, ApiError> {
    state.registry().cancel(id)?;
    tracing::info!(session_id = id, "Session stopped by request");
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /stats`
pub async fn stats(State(state): State<AppState>) -> Json<ServerStats> {
    Json(state.registry().stats())
}
