//! Real-time channel protocol.
//!
//! Every WebSocket text frame carries one JSON envelope. Frames sent by a
//! client name a `destination`; frames sent by the server name the `topic`
//! they were published on.
//!
//! ```json
//! { "destination": "subscribe", "body": { "topic": "draw", "roomId": "r1" } }
//! { "destination": "draw", "body": { "roomId": "r1", "type": "line", "data": "{...}" } }
//! { "topic": "joined", "body": { "roomId": "r1" } }
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::{CodecResult, DrawMessage};

/// Sub-protocol negotiated on the WebSocket handshake.
pub const PROTOCOL: &str = "inkroom.v1";

/// Broadcast topics a client subscribes to before joining a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Draw,
    Chat,
    Cursor,
    /// Room-scoped user list.
    Presence,
}

impl Topic {
    pub const ALL: [Topic; 4] = [Topic::Draw, Topic::Chat, Topic::Cursor, Topic::Presence];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub topic: Topic,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub room_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorMessage {
    pub room_id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// One entry of a room's user list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceEvent {
    Joined,
    Left,
}

/// Room user list broadcast after someone joins or leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMessage {
    pub room_id: String,
    pub username: String,
    pub event: PresenceEvent,
    pub users: Vec<UserPresence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Frames sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "destination", content = "body", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe(Subscription),
    Join(RoomRef),
    Leave(RoomRef),
    Draw(DrawMessage),
    Chat(ChatMessage),
    Cursor(CursorMessage),
}

impl ClientFrame {
    pub fn to_json(&self) -> CodecResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> CodecResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "body", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Acknowledges one subscription.
    Subscribed(Subscription),
    /// Confirms the join announcement.
    Joined(RoomRef),
    Draw(DrawMessage),
    Chat(ChatMessage),
    Cursor(CursorMessage),
    Users(PresenceMessage),
    Error(ErrorBody),
}

impl ServerFrame {
    pub fn to_json(&self) -> CodecResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> CodecResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error(ErrorBody {
            message: message.into(),
        })
    }
}
