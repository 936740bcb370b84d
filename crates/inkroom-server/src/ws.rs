//! Real-time channel: subscriptions, room membership and live relaying.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use inkroom_core::codec::DrawMessage;
use inkroom_core::protocol::{
    ChatMessage, ClientFrame, CursorMessage, PROTOCOL, RoomRef, ServerFrame, Subscription, Topic,
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::{AppState, CHANNEL_CAPACITY};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);
    let username = query
        .token
        .or(header_token)
        .and_then(|token| state.authenticate(&token));

    match username {
        Some(username) => ws
            .protocols([PROTOCOL])
            .on_upgrade(move |socket| handle_socket(socket, state, username)),
        None => (StatusCode::UNAUTHORIZED, "Not authenticated").into_response(),
    }
}

/// What forwarding tasks hand to the socket loop.
#[derive(Debug, PartialEq, Eq)]
enum Outbound {
    Frame(String),
    /// A subscription fell behind; the connection can no longer be trusted
    /// to have seen every broadcast.
    Lagged(u64),
}

/// Forward one broadcast channel into a connection's outbound queue.
/// Stops after reporting a lag.
fn forward(mut rx: broadcast::Receiver<String>, out: mpsc::Sender<Outbound>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(json) => {
                    if out.send(Outbound::Frame(json)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Subscriber lagged, {} message(s) dropped", skipped);
                    let _ = out.send(Outbound::Lagged(skipped)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Per-connection state
struct Connection {
    id: Uuid,
    username: String,
    state: Arc<AppState>,
    out: mpsc::Sender<Outbound>,
    /// Global topics already forwarded.
    topics: HashMap<Topic, JoinHandle<()>>,
    /// Presence forwarding by room.
    presence: HashMap<String, JoinHandle<()>>,
    rooms: HashSet<String>,
}

impl Connection {
    fn new(state: Arc<AppState>, username: String, out: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            state,
            out,
            topics: HashMap::new(),
            presence: HashMap::new(),
            rooms: HashSet::new(),
        }
    }

    /// Handle one client frame, returning the direct reply if any.
    fn handle(&mut self, frame: ClientFrame) -> Option<ServerFrame> {
        match frame {
            ClientFrame::Subscribe(subscription) => Some(self.subscribe(subscription)),
            ClientFrame::Join(room) => Some(self.join(room)),
            ClientFrame::Leave(room) => {
                self.leave(&room.room_id);
                None
            }
            ClientFrame::Draw(message) => self.draw(message),
            ClientFrame::Chat(message) => self.chat(message),
            ClientFrame::Cursor(message) => self.cursor(message),
        }
    }

    fn subscribe(&mut self, subscription: Subscription) -> ServerFrame {
        if !self.state.room_exists(&subscription.room_id) {
            return ServerFrame::error(format!("Room {} not found", subscription.room_id));
        }
        match subscription.topic {
            Topic::Presence => {
                if !self.presence.contains_key(&subscription.room_id) {
                    if let Some(rx) = self.state.subscribe_presence(&subscription.room_id) {
                        let handle = forward(rx, self.out.clone());
                        self.presence.insert(subscription.room_id.clone(), handle);
                    }
                }
            }
            topic => {
                if !self.topics.contains_key(&topic) {
                    let rx = match topic {
                        Topic::Chat => self.state.subscribe_chat(),
                        Topic::Cursor => self.state.subscribe_cursor(),
                        _ => self.state.subscribe_draw(),
                    };
                    self.topics.insert(topic, forward(rx, self.out.clone()));
                }
            }
        }
        debug!("{} subscribed to {:?} for {}", self.id, subscription.topic, subscription.room_id);
        ServerFrame::Subscribed(subscription)
    }

    fn join(&mut self, room: RoomRef) -> ServerFrame {
        match self.state.join(&room.room_id, self.id, &self.username) {
            Some(presence) => {
                self.rooms.insert(room.room_id.clone());
                info!("{} ({}) joined room {}", self.username, self.id, room.room_id);
                self.state.publish_presence(presence);
                ServerFrame::Joined(room)
            }
            None => ServerFrame::error(format!("Room {} not found", room.room_id)),
        }
    }

    fn leave(&mut self, room_id: &str) {
        if !self.rooms.remove(room_id) {
            return;
        }
        if let Some(handle) = self.presence.remove(room_id) {
            handle.abort();
        }
        if let Some(presence) = self.state.leave(room_id, self.id) {
            self.state.publish_presence(presence);
        }
        info!("{} ({}) left room {}", self.username, self.id, room_id);
    }

    fn not_joined(&self, room_id: &str) -> Option<ServerFrame> {
        if self.rooms.contains(room_id) {
            None
        } else {
            Some(ServerFrame::error(format!("Join room {} first", room_id)))
        }
    }

    fn draw(&mut self, message: DrawMessage) -> Option<ServerFrame> {
        if let Some(error) = self.not_joined(&message.room_id) {
            return Some(error);
        }
        // Sent back to the author too: the echo carries the assigned sequence.
        match self.state.record_and_publish_draw(message, &self.username) {
            Some(_) => None,
            None => Some(ServerFrame::error("Room no longer exists")),
        }
    }

    fn chat(&mut self, message: ChatMessage) -> Option<ServerFrame> {
        if let Some(error) = self.not_joined(&message.room_id) {
            return Some(error);
        }
        if message.content.trim().is_empty() {
            return Some(ServerFrame::error("Chat message must not be empty"));
        }
        match self.state.record_chat(message, &self.username) {
            Some(stamped) => {
                self.state.publish_chat(stamped);
                None
            }
            None => Some(ServerFrame::error("Room no longer exists")),
        }
    }

    fn cursor(&mut self, mut message: CursorMessage) -> Option<ServerFrame> {
        if let Some(error) = self.not_joined(&message.room_id) {
            return Some(error);
        }
        message.username = Some(self.username.clone());
        self.state.publish_cursor(message);
        None
    }

    /// Leave every room and stop forwarding.
    fn close(&mut self) {
        let rooms: Vec<String> = self.rooms.iter().cloned().collect();
        for room_id in rooms {
            self.leave(&room_id);
        }
        let handles = self.topics.drain().map(|(_, handle)| handle);
        for handle in handles.chain(self.presence.drain().map(|(_, handle)| handle)) {
            handle.abort();
        }
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, username: String) {
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(CHANNEL_CAPACITY);
    let mut connection = Connection::new(state, username, out_tx);
    info!("New connection: {} ({})", connection.id, connection.username);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match ClientFrame::from_json(text.as_str()) {
                            Ok(frame) => connection.handle(frame),
                            Err(e) => {
                                warn!("Invalid message from {}: {}", connection.id, e);
                                Some(ServerFrame::error(format!("Invalid message: {}", e)))
                            }
                        };
                        let Some(reply) = reply else { continue };
                        match reply.to_json() {
                            Ok(json) => {
                                if sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Failed to encode reply: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ignore binary and ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", connection.id, e);
                        break;
                    }
                }
            }

            // Broadcasts from subscribed topics
            Some(outbound) = out_rx.recv() => match outbound {
                Outbound::Frame(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Lagged(skipped) => {
                    // The client rebuilds from persisted history on reconnect.
                    warn!("Closing {}: missed {} broadcast(s)", connection.id, skipped);
                    let error = ServerFrame::error(format!(
                        "Missed {} update(s), reconnect to resync",
                        skipped
                    ));
                    if let Ok(json) = error.to_json() {
                        let _ = sender.send(Message::Text(json.into())).await;
                    }
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    // Cleanup on disconnect
    connection.close();
    info!("Connection closed: {}", connection.id);
}
