//! Shared server state: rooms, their persisted history and live channels.

use dashmap::DashMap;
use inkroom_core::api::{ChatRecord, CreatedRoom, RoomSummary, SaveSnapshotRequest, SnapshotBody};
use inkroom_core::codec::{DrawMessage, StoredOperation};
use inkroom_core::protocol::{
    ChatMessage, CursorMessage, PresenceEvent, PresenceMessage, ServerFrame, UserPresence,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Capacity of every broadcast channel.
pub const CHANNEL_CAPACITY: usize = 256;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Maps bearer tokens to user names.
///
/// An empty table accepts any non-empty token and uses it as the user name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenTable {
    tokens: HashMap<String, String>,
}

impl TokenTable {
    /// Parse `token=user,token=user`. Malformed entries are skipped.
    pub fn parse(spec: &str) -> Self {
        let tokens = spec
            .split(',')
            .filter_map(|entry| {
                let (token, user) = entry.split_once('=')?;
                let (token, user) = (token.trim(), user.trim());
                if token.is_empty() || user.is_empty() {
                    warn!("Ignoring malformed token entry {:?}", entry);
                    return None;
                }
                Some((token.to_string(), user.to_string()))
            })
            .collect();
        Self { tokens }
    }

    pub fn authenticate(&self, token: &str) -> Option<String> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        if self.tokens.is_empty() {
            return Some(token.to_string());
        }
        self.tokens.get(token).cloned()
    }
}

/// Room state
struct Room {
    name: String,
    owner: String,
    operations: Vec<StoredOperation>,
    snapshot: SnapshotBody,
    chat: Vec<ChatRecord>,
    /// Connected users by connection id.
    presence: BTreeMap<Uuid, UserPresence>,
    /// Room-scoped user list channel.
    presence_tx: broadcast::Sender<String>,
}

impl Room {
    fn new(name: &str, owner: &str) -> Self {
        let (presence_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            name: name.to_string(),
            owner: owner.to_string(),
            operations: Vec::new(),
            snapshot: SnapshotBody::default(),
            chat: Vec::new(),
            presence: BTreeMap::new(),
            presence_tx,
        }
    }

    fn latest_sequence(&self) -> u64 {
        self.operations.last().map_or(0, |op| op.sequence)
    }

    fn summary(&self, room_id: &str) -> RoomSummary {
        RoomSummary {
            room_id: room_id.to_string(),
            name: self.name.clone(),
            owner: Some(self.owner.clone()),
        }
    }

    /// Distinct users currently in the room.
    fn users(&self) -> Vec<UserPresence> {
        let mut users: Vec<UserPresence> = Vec::new();
        for user in self.presence.values() {
            if !users.iter().any(|u| u.username == user.username) {
                users.push(user.clone());
            }
        }
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }
}

/// Shared application state
pub struct AppState {
    rooms: DashMap<String, Room>,
    tokens: TokenTable,
    user_ids: DashMap<String, u64>,
    next_user_id: AtomicU64,
    draw_tx: broadcast::Sender<String>,
    chat_tx: broadcast::Sender<String>,
    cursor_tx: broadcast::Sender<String>,
}

impl AppState {
    pub fn new(tokens: TokenTable) -> Self {
        let (draw_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (chat_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (cursor_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            rooms: DashMap::new(),
            tokens,
            user_ids: DashMap::new(),
            next_user_id: AtomicU64::new(1),
            draw_tx,
            chat_tx,
            cursor_tx,
        }
    }

    pub fn authenticate(&self, token: &str) -> Option<String> {
        self.tokens.authenticate(token)
    }

    /// Stable numeric id for a user name.
    pub fn user_id(&self, username: &str) -> u64 {
        *self
            .user_ids
            .entry(username.to_string())
            .or_insert_with(|| self.next_user_id.fetch_add(1, Ordering::Relaxed))
    }

    // --- Rooms ---

    pub fn create_room(&self, name: &str, owner: &str) -> CreatedRoom {
        let room_id = Uuid::new_v4().to_string();
        self.rooms.insert(room_id.clone(), Room::new(name, owner));
        CreatedRoom {
            room_id,
            name: name.to_string(),
        }
    }

    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .rooms
            .iter()
            .map(|entry| entry.value().summary(entry.key()))
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.room_id.cmp(&b.room_id)));
        rooms
    }

    pub fn room(&self, room_id: &str) -> Option<RoomSummary> {
        self.rooms.get(room_id).map(|room| room.summary(room_id))
    }

    pub fn snapshot(&self, room_id: &str) -> Option<SnapshotBody> {
        self.rooms.get(room_id).map(|room| room.snapshot.clone())
    }

    /// Store a baseline. Without a reported watermark the latest sequence is used.
    pub fn save_snapshot(&self, room_id: &str, request: SaveSnapshotRequest) -> Option<u64> {
        let mut room = self.rooms.get_mut(room_id)?;
        let latest = room.latest_sequence();
        let sequence = request.sequence.map_or(latest, |s| s.min(latest));
        room.snapshot = SnapshotBody {
            image_data: request.image_data,
            created_at: Some(now_millis()),
            sequence: Some(sequence),
        };
        Some(sequence)
    }

    pub fn operations_after(&self, room_id: &str, after: u64) -> Option<Vec<StoredOperation>> {
        let room = self.rooms.get(room_id)?;
        Some(
            room.operations
                .iter()
                .filter(|op| op.sequence > after)
                .cloned()
                .collect(),
        )
    }

    pub fn chat_history(&self, room_id: &str) -> Option<Vec<ChatRecord>> {
        self.rooms.get(room_id).map(|room| room.chat.clone())
    }

    // --- Live traffic ---

    /// Persist a draw operation, stamp it with its sender and sequence, and
    /// broadcast it. The broadcast happens while the room entry is still
    /// locked, so subscribers see draws in sequence order.
    pub fn record_and_publish_draw(
        &self,
        mut message: DrawMessage,
        username: &str,
    ) -> Option<DrawMessage> {
        let mut room = self.rooms.get_mut(&message.room_id)?;
        let sequence = room.latest_sequence() + 1;
        room.operations.push(StoredOperation {
            kind: message.kind.clone(),
            data: message.data.clone(),
            sequence,
            client_op_id: message.client_op_id,
        });
        message.username = Some(username.to_string());
        message.sequence = Some(sequence);
        publish(&self.draw_tx, &ServerFrame::Draw(message.clone()));
        drop(room);
        Some(message)
    }

    pub fn record_chat(&self, mut message: ChatMessage, username: &str) -> Option<ChatMessage> {
        let mut room = self.rooms.get_mut(&message.room_id)?;
        room.chat.push(ChatRecord {
            username: username.to_string(),
            content: message.content.clone(),
            timestamp: Some(now_millis()),
        });
        message.username = Some(username.to_string());
        Some(message)
    }

    /// Add a connection to a room's presence list.
    pub fn join(
        &self,
        room_id: &str,
        connection: Uuid,
        username: &str,
    ) -> Option<PresenceMessage> {
        let user_id = self.user_id(username);
        let mut room = self.rooms.get_mut(room_id)?;
        room.presence.insert(
            connection,
            UserPresence {
                username: username.to_string(),
                user_id: Some(user_id),
            },
        );
        Some(PresenceMessage {
            room_id: room_id.to_string(),
            username: username.to_string(),
            event: PresenceEvent::Joined,
            users: room.users(),
        })
    }

    /// Remove a connection from a room's presence list.
    pub fn leave(&self, room_id: &str, connection: Uuid) -> Option<PresenceMessage> {
        let mut room = self.rooms.get_mut(room_id)?;
        let user = room.presence.remove(&connection)?;
        Some(PresenceMessage {
            room_id: room_id.to_string(),
            username: user.username,
            event: PresenceEvent::Left,
            users: room.users(),
        })
    }

    // --- Channels ---

    pub fn subscribe_draw(&self) -> broadcast::Receiver<String> {
        self.draw_tx.subscribe()
    }

    pub fn subscribe_chat(&self) -> broadcast::Receiver<String> {
        self.chat_tx.subscribe()
    }

    pub fn subscribe_cursor(&self) -> broadcast::Receiver<String> {
        self.cursor_tx.subscribe()
    }

    pub fn subscribe_presence(&self, room_id: &str) -> Option<broadcast::Receiver<String>> {
        self.rooms.get(room_id).map(|room| room.presence_tx.subscribe())
    }

    pub fn publish_chat(&self, message: ChatMessage) {
        publish(&self.chat_tx, &ServerFrame::Chat(message));
    }

    pub fn publish_cursor(&self, message: CursorMessage) {
        publish(&self.cursor_tx, &ServerFrame::Cursor(message));
    }

    pub fn publish_presence(&self, message: PresenceMessage) {
        let tx = match self.rooms.get(&message.room_id) {
            Some(room) => room.presence_tx.clone(),
            None => return,
        };
        publish(&tx, &ServerFrame::Users(message));
    }
}

fn publish(tx: &broadcast::Sender<String>, frame: &ServerFrame) {
    match frame.to_json() {
        // No receivers is not an error.
        Ok(json) => {
            let receivers = tx.send(json).unwrap_or(0);
            debug!("Published to {} subscriber(s)", receivers);
        }
        Err(e) => warn!("Failed to encode frame: {}", e),
    }
}
