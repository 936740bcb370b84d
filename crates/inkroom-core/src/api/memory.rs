//! In-memory room API.
//!
//! Implements the same endpoint semantics as the server without any I/O.
//! Cloned handles share one store, so a test can keep a handle to seed
//! rooms and inspect calls while the client owns another.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use uuid::Uuid;

use super::{
    ApiError, ApiResult, ChatRecord, CreatedRoom, RoomApi, RoomSummary, SaveResponse,
    SaveSnapshotRequest, SnapshotBody,
};
use crate::codec::{DrawMessage, StoredOperation};

#[derive(Debug, Default)]
struct MemoryRoom {
    name: String,
    owner: Option<String>,
    snapshot: SnapshotBody,
    operations: Vec<StoredOperation>,
    chat: Vec<ChatRecord>,
}

impl MemoryRoom {
    fn latest_sequence(&self) -> u64 {
        self.operations.last().map_or(0, |op| op.sequence)
    }
}

#[derive(Debug, Default)]
struct MemoryStore {
    rooms: BTreeMap<String, MemoryRoom>,
    next_room: u64,
    fail_baseline: bool,
    calls: Vec<String>,
}

/// Shared in-memory backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryRoomApi {
    store: Arc<RwLock<MemoryStore>>,
}

fn not_found(room_id: &str) -> ApiError {
    ApiError::Status {
        status: 404,
        message: format!("Room not found: {}", room_id),
    }
}

fn authorize(token: &str) -> ApiResult<()> {
    if token.is_empty() {
        return Err(ApiError::NotAuthenticated);
    }
    Ok(())
}

impl MemoryRoomApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> RwLockWriteGuard<'_, MemoryStore> {
        self.store.write().unwrap_or_else(|e| e.into_inner())
    }

    fn with_room<T>(
        &self,
        call: String,
        room_id: &str,
        f: impl FnOnce(&mut MemoryRoom) -> T,
    ) -> ApiResult<T> {
        let mut store = self.store();
        store.calls.push(call);
        let room = store.rooms.get_mut(room_id).ok_or_else(|| not_found(room_id))?;
        Ok(f(room))
    }

    /// Create a room with a fixed id.
    pub fn add_room(&self, room_id: &str, name: &str) {
        self.store().rooms.insert(
            room_id.to_string(),
            MemoryRoom {
                name: name.to_string(),
                ..MemoryRoom::default()
            },
        );
    }

    /// Append an operation to a room's log, returning its sequence.
    pub fn push_operation(&self, room_id: &str, kind: &str, data: &str) -> u64 {
        self.push_stored(room_id, kind, data, None)
    }

    /// Persist a draw frame the way the server does, keeping its client id.
    pub fn push_draw(&self, message: &DrawMessage) -> u64 {
        self.push_stored(&message.room_id, &message.kind, &message.data, message.client_op_id)
    }

    fn push_stored(&self, room_id: &str, kind: &str, data: &str, client_op_id: Option<Uuid>) -> u64 {
        let mut store = self.store();
        let room = store.rooms.entry(room_id.to_string()).or_default();
        let sequence = room.latest_sequence() + 1;
        room.operations.push(StoredOperation {
            kind: kind.to_string(),
            data: data.to_string(),
            sequence,
            client_op_id,
        });
        sequence
    }

    pub fn set_baseline(&self, room_id: &str, image_data: &str, sequence: u64) {
        let mut store = self.store();
        let room = store.rooms.entry(room_id.to_string()).or_default();
        room.snapshot = SnapshotBody {
            image_data: image_data.to_string(),
            created_at: None,
            sequence: Some(sequence),
        };
    }

    pub fn push_chat(&self, room_id: &str, username: &str, content: &str) {
        let mut store = self.store();
        let room = store.rooms.entry(room_id.to_string()).or_default();
        room.chat.push(ChatRecord {
            username: username.to_string(),
            content: content.to_string(),
            timestamp: None,
        });
    }

    /// Make every baseline fetch fail with a server error.
    pub fn fail_baseline(&self, fail: bool) {
        self.store().fail_baseline = fail;
    }

    pub fn baseline(&self, room_id: &str) -> Option<SnapshotBody> {
        self.store().rooms.get(room_id).map(|room| room.snapshot.clone())
    }

    /// Calls made so far, as `name:room` strings.
    pub fn calls(&self) -> Vec<String> {
        self.store().calls.clone()
    }
}

impl RoomApi for MemoryRoomApi {
    fn create_room(&self, token: &str, name: &str) -> ApiResult<CreatedRoom> {
        authorize(token)?;
        let mut store = self.store();
        store.calls.push("create".to_string());
        store.next_room += 1;
        let room_id = format!("room-{}", store.next_room);
        store.rooms.insert(
            room_id.clone(),
            MemoryRoom {
                name: name.to_string(),
                owner: Some(token.to_string()),
                ..MemoryRoom::default()
            },
        );
        Ok(CreatedRoom {
            room_id,
            name: name.to_string(),
        })
    }

    fn list_rooms(&self, token: &str) -> ApiResult<Vec<RoomSummary>> {
        authorize(token)?;
        let mut store = self.store();
        store.calls.push("list".to_string());
        Ok(store
            .rooms
            .iter()
            .map(|(room_id, room)| RoomSummary {
                room_id: room_id.clone(),
                name: room.name.clone(),
                owner: room.owner.clone(),
            })
            .collect())
    }

    fn fetch_baseline(&self, token: &str, room_id: &str) -> ApiResult<SnapshotBody> {
        authorize(token)?;
        if self.store().fail_baseline {
            self.store().calls.push(format!("baseline:{}", room_id));
            return Err(ApiError::Status {
                status: 500,
                message: "baseline unavailable".to_string(),
            });
        }
        self.with_room(format!("baseline:{}", room_id), room_id, |room| {
            room.snapshot.clone()
        })
    }

    fn fetch_operations(
        &self,
        token: &str,
        room_id: &str,
        after_sequence: u64,
    ) -> ApiResult<Vec<StoredOperation>> {
        authorize(token)?;
        self.with_room(
            format!("operations:{}:{}", room_id, after_sequence),
            room_id,
            |room| {
                room.operations
                    .iter()
                    .filter(|op| op.sequence > after_sequence)
                    .cloned()
                    .collect()
            },
        )
    }

    fn fetch_chat_history(&self, token: &str, room_id: &str) -> ApiResult<Vec<ChatRecord>> {
        authorize(token)?;
        self.with_room(format!("messages:{}", room_id), room_id, |room| {
            room.chat.clone()
        })
    }

    fn save_baseline(
        &self,
        token: &str,
        room_id: &str,
        request: &SaveSnapshotRequest,
    ) -> ApiResult<SaveResponse> {
        authorize(token)?;
        self.with_room(format!("save:{}", room_id), room_id, |room| {
            let sequence = request.sequence.unwrap_or_else(|| room.latest_sequence());
            room.snapshot = SnapshotBody {
                image_data: request.image_data.clone(),
                created_at: None,
                sequence: Some(sequence),
            };
            SaveResponse {
                success: true,
                message: "Canvas saved".to_string(),
            }
        })
    }
}
