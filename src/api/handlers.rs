//! API request handlers.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Serialize;
use tracing::info;

use crate::credentials::CurrentUser;
use crate::hub::{CreateSessionRequest, Session};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Start a session for the authenticated user.
///
/// A spawn failure still answers 200: the returned session is `failed` and
/// carries the error message, so the caller can inspect and resubmit.
pub async fn create_session(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<Json<Session>> {
    info!(user = %user.name, name = %request.name, "session start requested");
    let session = state.hub.start_session(&user.name, request).await?;
    Ok(Json(session))
}

/// List the authenticated user's sessions.
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Json<Vec<Session>> {
    let sessions = state
        .hub
        .list_sessions()
        .into_iter()
        .filter(|s| s.owner == user.name)
        .collect();
    Json(sessions)
}

/// Get one of the authenticated user's sessions.
pub async fn get_session(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    let session = owned_session(&state, &user, &session_id)?;
    Ok(Json(session))
}

/// Stop and tear down a session.
pub async fn stop_session(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    owned_session(&state, &user, &session_id)?;
    info!(user = %user.name, session = %session_id, "session stop requested");
    let session = state.hub.stop_session(&session_id).await?;
    Ok(Json(session))
}

/// Sessions are only visible to their owner; anything else reads as absent.
fn owned_session(state: &AppState, user: &CurrentUser, session_id: &str) -> ApiResult<Session> {
    state
        .hub
        .get_session(session_id)
        .filter(|s| s.owner == user.name)
        .ok_or_else(|| ApiError::not_found(format!("session not found: {}", session_id)))
}
