//! Room REST API.
//!
//! Room management, persisted baselines, stored operations and chat history
//! live behind a small JSON API. [`RoomApi`] is the blocking client surface;
//! [`dispatch`] moves those calls off the caller's thread.

pub mod dispatch;
pub mod http;
pub mod memory;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::StoredOperation;

pub use dispatch::{ApiDispatcher, ApiRequest, ApiResponse, InlineDispatcher, ThreadedDispatcher, Ticket};
pub use http::HttpRoomApi;
pub use memory::MemoryRoomApi;

/// REST errors. None of them are fatal; they are surfaced to the user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("request failed ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("not authenticated")]
    NotAuthenticated,
}

/// Result type for REST calls.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRoom {
    pub room_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// A persisted baseline. An empty `image_data` means the room has none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBody {
    #[serde(default)]
    pub image_data: String,
    /// Unix time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
    /// Highest operation sequence folded into the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl SnapshotBody {
    pub fn has_image(&self) -> bool {
        !self.image_data.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSnapshotRequest {
    pub image_data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// One stored chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub username: String,
    pub content: String,
    /// Unix time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// Blocking client for the room endpoints. Every call carries a bearer token.
pub trait RoomApi {
    fn create_room(&self, token: &str, name: &str) -> ApiResult<CreatedRoom>;

    fn list_rooms(&self, token: &str) -> ApiResult<Vec<RoomSummary>>;

    fn fetch_baseline(&self, token: &str, room_id: &str) -> ApiResult<SnapshotBody>;

    /// Stored operations with a sequence strictly greater than `after_sequence`.
    fn fetch_operations(
        &self,
        token: &str,
        room_id: &str,
        after_sequence: u64,
    ) -> ApiResult<Vec<StoredOperation>>;

    fn fetch_chat_history(&self, token: &str, room_id: &str) -> ApiResult<Vec<ChatRecord>>;

    fn save_baseline(
        &self,
        token: &str,
        room_id: &str,
        request: &SaveSnapshotRequest,
    ) -> ApiResult<SaveResponse>;
}
