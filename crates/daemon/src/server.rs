// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP server exposing the coordinator's resource map.
//!
//! Each mutating handler carries a per-request cancellation token whose drop
//! guard fires when the connection goes away, so a disconnected client's
//! in-flight wait is cancelled instead of holding capacity forever.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rsmap_core::Error;

use crate::acquire::{AcquireEntry, ReleaseEntry};
use crate::map::{ResourceMap, ServerSideMap};
use crate::protocol::{
    AcquireMultiRequest, AcquireRequest, CompleteInitRequest, Empty, ErrorBody, ErrorCode,
    FailInitRequest, ReleaseMultiRequest, ReleaseRequest, StatusResponse, TryInitRequest,
    TryInitResponse, ACQUIRE_MULTI_PATH, ACQUIRE_PATH, COMPLETE_INIT_PATH, FAIL_INIT_PATH,
    RELEASE_MULTI_PATH, RELEASE_PATH, STATUS_PATH, TRY_INIT_PATH,
};

/// Shared state of the coordinator's HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    map: Arc<ServerSideMap>,
    addr: String,
    started: Instant,
}

impl AppState {
    pub fn new(map: Arc<ServerSideMap>, addr: String) -> Self {
        Self {
            map,
            addr,
            started: Instant::now(),
        }
    }
}

/// Build the coordinator router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(STATUS_PATH, get(status))
        .route(TRY_INIT_PATH, post(try_init))
        .route(COMPLETE_INIT_PATH, post(complete_init))
        .route(FAIL_INIT_PATH, post(fail_init))
        .route(ACQUIRE_PATH, post(acquire))
        .route(ACQUIRE_MULTI_PATH, post(acquire_multi))
        .route(RELEASE_PATH, post(release))
        .route(RELEASE_MULTI_PATH, post(release_multi))
        .with_state(state)
}

/// Serve until `shutdown` fires, then drain gracefully.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody::from(&self.0);
        let status = match body.code {
            ErrorCode::Cancelled => StatusCode::REQUEST_TIMEOUT,
            ErrorCode::Closing => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InvalidOperation => StatusCode::CONFLICT,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Storage => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Transport => StatusCode::BAD_GATEWAY,
            ErrorCode::Config => StatusCode::BAD_REQUEST,
        };
        debug!(code = ?body.code, message = %body.message, "request failed");
        (status, Json(body)).into_response()
    }
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        addr: state.addr.clone(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

async fn try_init(
    State(state): State<AppState>,
    Json(req): Json<TryInitRequest>,
) -> Result<Json<TryInitResponse>, ApiError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let should_try = state
        .map
        .try_init(&req.resource, &req.client_id, &cancel)
        .await?;
    Ok(Json(TryInitResponse { should_try }))
}

async fn complete_init(
    State(state): State<AppState>,
    Json(req): Json<CompleteInitRequest>,
) -> Result<Json<Empty>, ApiError> {
    state.map.complete_init(&req.resource, &req.client_id).await?;
    Ok(Json(Empty {}))
}

async fn fail_init(
    State(state): State<AppState>,
    Json(req): Json<FailInitRequest>,
) -> Result<Json<Empty>, ApiError> {
    state.map.fail_init(&req.resource, &req.client_id).await?;
    Ok(Json(Empty {}))
}

async fn acquire(
    State(state): State<AppState>,
    Json(req): Json<AcquireRequest>,
) -> Result<Json<Empty>, ApiError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    state
        .map
        .acquire(&req.resource, &req.client_id, req.max, req.exclusive, &cancel)
        .await?;
    Ok(Json(Empty {}))
}

async fn acquire_multi(
    State(state): State<AppState>,
    Json(req): Json<AcquireMultiRequest>,
) -> Result<Json<Empty>, ApiError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let entries: Vec<AcquireEntry> = req.entries.into_iter().map(Into::into).collect();
    state.map.acquire_multi(&entries, &cancel).await?;
    Ok(Json(Empty {}))
}

async fn release(
    State(state): State<AppState>,
    Json(req): Json<ReleaseRequest>,
) -> Result<Json<Empty>, ApiError> {
    state.map.release(&req.resource, &req.client_id).await?;
    Ok(Json(Empty {}))
}

async fn release_multi(
    State(state): State<AppState>,
    Json(req): Json<ReleaseMultiRequest>,
) -> Result<Json<Empty>, ApiError> {
    let entries: Vec<ReleaseEntry> = req.entries.into_iter().map(Into::into).collect();
    state.map.release_multi(&entries).await?;
    Ok(Json(Empty {}))
}
