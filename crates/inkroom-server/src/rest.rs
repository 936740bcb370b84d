//! REST endpoints for room management and persisted history.

use axum::{
    Json,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use inkroom_core::api::{
    ChatRecord, CreateRoomRequest, CreatedRoom, RoomSummary, SaveResponse, SaveSnapshotRequest,
    SnapshotBody,
};
use inkroom_core::codec::StoredOperation;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::state::AppState;

/// Failure returned as `{ "error": ... }` with a matching status.
#[derive(Debug)]
pub enum ApiFailure {
    Unauthorized,
    NotFound(String),
    BadRequest(String),
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiFailure::Unauthorized => (StatusCode::UNAUTHORIZED, "Not authenticated".to_string()),
            ApiFailure::NotFound(room_id) => {
                (StatusCode::NOT_FOUND, format!("Room {} not found", room_id))
            }
            ApiFailure::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Bearer token from an `Authorization` header.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

/// The authenticated caller.
pub struct AuthUser(pub String);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiFailure;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        bearer_token(parts)
            .and_then(|token| state.authenticate(token))
            .map(AuthUser)
            .ok_or(ApiFailure::Unauthorized)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationsQuery {
    #[serde(default)]
    after_sequence: u64,
}

pub async fn create_room(
    State(state): State<Arc<AppState>>,
    AuthUser(username): AuthUser,
    Json(request): Json<CreateRoomRequest>,
) -> Result<Json<CreatedRoom>, ApiFailure> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiFailure::BadRequest("Room name must not be empty".to_string()));
    }
    let created = state.create_room(name, &username);
    info!("{} created room {} ({})", username, created.room_id, created.name);
    Ok(Json(created))
}

pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Json<Vec<RoomSummary>> {
    Json(state.list_rooms())
}

pub async fn room(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSummary>, ApiFailure> {
    state.room(&room_id).map(Json).ok_or(ApiFailure::NotFound(room_id))
}

pub async fn snapshot(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(room_id): Path<String>,
) -> Result<Json<SnapshotBody>, ApiFailure> {
    state.snapshot(&room_id).map(Json).ok_or(ApiFailure::NotFound(room_id))
}

pub async fn save_snapshot(
    State(state): State<Arc<AppState>>,
    AuthUser(username): AuthUser,
    Path(room_id): Path<String>,
    Json(request): Json<SaveSnapshotRequest>,
) -> Result<Json<SaveResponse>, ApiFailure> {
    if request.image_data.trim().is_empty() {
        return Err(ApiFailure::BadRequest("imageData must not be empty".to_string()));
    }
    let sequence = state
        .save_snapshot(&room_id, request)
        .ok_or_else(|| ApiFailure::NotFound(room_id.clone()))?;
    info!("{} saved baseline of {} at sequence {}", username, room_id, sequence);
    Ok(Json(SaveResponse {
        success: true,
        message: format!("Saved at sequence {}", sequence),
    }))
}

pub async fn operations(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(room_id): Path<String>,
    Query(query): Query<OperationsQuery>,
) -> Result<Json<Vec<StoredOperation>>, ApiFailure> {
    state
        .operations_after(&room_id, query.after_sequence)
        .map(Json)
        .ok_or(ApiFailure::NotFound(room_id))
}

pub async fn messages(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<ChatRecord>>, ApiFailure> {
    state.chat_history(&room_id).map(Json).ok_or(ApiFailure::NotFound(room_id))
}
