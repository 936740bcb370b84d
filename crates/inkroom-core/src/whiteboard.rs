//! Whiteboard session context.
//!
//! [`Whiteboard`] owns everything one participant needs: the surface and its
//! undo history, the transport, the REST dispatcher and at most one active
//! room. Joining a room tears the previous one down first, so no two rooms'
//! state ever coexists.
//!
//! The owner calls [`Whiteboard::poll`] regularly (once per frame in a UI).
//! Every REST call made for a room carries that room's epoch; results that
//! come back after the room was left are ignored.

use kurbo::Point;
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

use crate::api::{
    ApiDispatcher, ApiError, ApiRequest, ApiResponse, ChatRecord, CreatedRoom, RoomSummary,
    SaveSnapshotRequest, Ticket,
};
use crate::applier::{self, ApplyOutcome};
use crate::bootstrap::Bootstrap;
use crate::codec;
use crate::config::ClientConfig;
use crate::history::RasterHistory;
use crate::operation::{DrawOp, DrawOperation, OpKind};
use crate::protocol::UserPresence;
use crate::session::{ConnectionState, Inbound, Session, SessionError, SessionResult, Submitted};
use crate::surface::Surface;
use crate::transport::Transport;

/// The authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub token: String,
}

/// One line of the room chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub username: String,
    pub content: String,
    pub client_msg_id: Option<Uuid>,
    pub timestamp: Option<u64>,
}

impl From<ChatRecord> for ChatEntry {
    fn from(record: ChatRecord) -> Self {
        Self {
            username: record.username,
            content: record.content,
            client_msg_id: None,
            timestamp: record.timestamp,
        }
    }
}

/// Things the UI may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum WhiteboardEvent {
    ConnectionChanged(ConnectionState),
    Joined { room_id: String },
    RoomCreated(CreatedRoom),
    RoomsListed(Vec<RoomSummary>),
    BootstrapComplete { room_id: String, replayed: usize, skipped: usize },
    RemoteDraw { kind: OpKind, origin: Option<String> },
    OperationSkipped(String),
    ChatReceived(ChatEntry),
    ChatHistoryLoaded(usize),
    ChatFailed { content: String, error: String },
    UsersChanged(Vec<UserPresence>),
    CursorMoved { username: String, x: f64, y: f64 },
    BaselineSaved(String),
    RequestFailed { request: &'static str, error: ApiError },
    ServerError(String),
}

/// State of the current room membership.
#[derive(Debug)]
struct ActiveRoom {
    epoch: u64,
    session: Session,
    bootstrap: Bootstrap,
    users: Vec<UserPresence>,
    cursors: HashMap<String, Point>,
    chat: Vec<ChatEntry>,
    /// Highest server sequence reflected on the surface.
    applied_sequence: Option<u64>,
}

impl ActiveRoom {
    fn saw_sequence(&mut self, sequence: Option<u64>) {
        if let Some(sequence) = sequence {
            self.applied_sequence = Some(self.applied_sequence.map_or(sequence, |s| s.max(sequence)));
        }
    }
}

fn issue_ticket(counter: &mut u64, epoch: u64) -> Ticket {
    *counter += 1;
    Ticket { epoch, id: *counter }
}

/// Route one inbound message into the room state.
fn handle_inbound<S: Surface>(
    room: &mut ActiveRoom,
    surface: &mut S,
    history: &mut RasterHistory<S::Frame>,
    events: &mut Vec<WhiteboardEvent>,
    inbound: Inbound,
) {
    match inbound {
        Inbound::StateChanged(state) => events.push(WhiteboardEvent::ConnectionChanged(state)),
        Inbound::Joined => events.push(WhiteboardEvent::Joined {
            room_id: room.session.room_id().to_string(),
        }),
        Inbound::Draw(message) => {
            if !room.bootstrap.is_complete() {
                log::debug!("Holding live {} until bootstrap completes", message.kind);
                room.bootstrap.buffer_live(message);
                return;
            }
            match applier::apply_message(&message, surface, history) {
                ApplyOutcome::Applied(kind) => {
                    room.saw_sequence(message.sequence);
                    events.push(WhiteboardEvent::RemoteDraw {
                        kind,
                        origin: message.username,
                    });
                }
                ApplyOutcome::Skipped(e) => {
                    room.saw_sequence(message.sequence);
                    events.push(WhiteboardEvent::OperationSkipped(e.to_string()));
                }
            }
        }
        Inbound::Echo {
            client_op_id,
            sequence,
        } => {
            room.bootstrap.note_own_echo(client_op_id, sequence);
            room.saw_sequence(sequence);
        }
        Inbound::Chat(message) => {
            let entry = ChatEntry {
                username: message.username.unwrap_or_default(),
                content: message.content,
                client_msg_id: message.client_msg_id,
                timestamp: None,
            };
            room.chat.push(entry.clone());
            events.push(WhiteboardEvent::ChatReceived(entry));
        }
        Inbound::Cursor(cursor) => {
            let username = cursor.username.unwrap_or_default();
            room.cursors.insert(username.clone(), Point::new(cursor.x, cursor.y));
            events.push(WhiteboardEvent::CursorMoved {
                username,
                x: cursor.x,
                y: cursor.y,
            });
        }
        Inbound::Users(presence) => {
            log::info!(
                "Room {}: {} {:?}, {} online",
                presence.room_id,
                presence.username,
                presence.event,
                presence.users.len()
            );
            room.cursors
                .retain(|name, _| presence.users.iter().any(|u| &u.username == name));
            room.users = presence.users;
            events.push(WhiteboardEvent::UsersChanged(room.users.clone()));
        }
        Inbound::ServerError(message) => events.push(WhiteboardEvent::ServerError(message)),
    }
}

/// A participant in shared whiteboard rooms.
pub struct Whiteboard<S: Surface, T: Transport, D: ApiDispatcher> {
    config: ClientConfig,
    identity: Option<Identity>,
    surface: S,
    history: RasterHistory<S::Frame>,
    transport: T,
    dispatcher: D,
    /// Bumped whenever the active room changes.
    epoch: u64,
    next_ticket: u64,
    room: Option<ActiveRoom>,
    events: Vec<WhiteboardEvent>,
}

impl<S: Surface, T: Transport, D: ApiDispatcher> Whiteboard<S, T, D> {
    pub fn new(config: ClientConfig, surface: S, transport: T, dispatcher: D) -> Self {
        let history = RasterHistory::new(surface.capture());
        Self {
            config,
            identity: None,
            surface,
            history,
            transport,
            dispatcher,
            epoch: Ticket::GLOBAL,
            next_ticket: 0,
            room: None,
            events: Vec::new(),
        }
    }

    // --- Accessors ---

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn history(&self) -> &RasterHistory<S::Frame> {
        &self.history
    }

    pub fn history_cursor(&self) -> usize {
        self.history.cursor()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut D {
        &mut self.dispatcher
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room.as_ref().map(|room| room.session.room_id())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.room
            .as_ref()
            .map_or(ConnectionState::Disconnected, |room| room.session.state())
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.room.as_ref().is_some_and(|room| room.bootstrap.is_complete())
    }

    pub fn pending_len(&self) -> usize {
        self.room.as_ref().map_or(0, |room| room.session.pending_len())
    }

    pub fn users(&self) -> &[UserPresence] {
        self.room
            .as_ref()
            .map(|room| room.users.as_slice())
            .unwrap_or_default()
    }

    pub fn cursors(&self) -> Option<&HashMap<String, Point>> {
        self.room.as_ref().map(|room| &room.cursors)
    }

    pub fn chat_log(&self) -> &[ChatEntry] {
        self.room
            .as_ref()
            .map(|room| room.chat.as_slice())
            .unwrap_or_default()
    }

    /// Highest server sequence reflected on the surface.
    pub fn applied_sequence(&self) -> Option<u64> {
        self.room.as_ref().and_then(|room| room.applied_sequence)
    }

    // --- Identity ---

    pub fn login(&mut self, username: &str, token: &str) {
        log::info!("Logged in as {}", username);
        self.identity = Some(Identity {
            username: username.to_string(),
            token: token.to_string(),
        });
    }

    /// Leave the current room and forget the credentials.
    pub fn logout(&mut self) {
        self.leave_room();
        if let Some(identity) = self.identity.take() {
            log::info!("Logged out {}", identity.username);
        }
    }

    fn token(&self) -> Result<String, ApiError> {
        self.identity
            .as_ref()
            .map(|identity| identity.token.clone())
            .ok_or(ApiError::NotAuthenticated)
    }

    fn submit(&mut self, epoch: u64, request: ApiRequest) -> Result<Ticket, ApiError> {
        let token = self.token()?;
        let ticket = issue_ticket(&mut self.next_ticket, epoch);
        self.dispatcher.submit(ticket, token, request);
        Ok(ticket)
    }

    // --- Rooms ---

    pub fn create_room(&mut self, name: &str) -> Result<Ticket, ApiError> {
        self.submit(
            Ticket::GLOBAL,
            ApiRequest::CreateRoom {
                name: name.to_string(),
            },
        )
    }

    pub fn list_rooms(&mut self) -> Result<Ticket, ApiError> {
        self.submit(Ticket::GLOBAL, ApiRequest::ListRooms)
    }

    /// Enter a room, leaving the current one first.
    ///
    /// The surface is cleared and the history reset immediately; the baseline
    /// fetch and the connection then proceed side by side.
    pub fn join_room(&mut self, room_id: &str, now: Instant) -> SessionResult<()> {
        let identity = self.identity.clone().ok_or(ApiError::NotAuthenticated)?;
        let request = self.config.connect_request(Some(&identity.token))?;

        self.leave_room();
        self.epoch += 1;
        let epoch = self.epoch;
        log::info!("Joining room {} (epoch {})", room_id, epoch);

        self.surface.clear();
        self.history.reset(self.surface.capture());

        let bootstrap = Bootstrap::new(room_id);
        let baseline = bootstrap.start();
        let mut room = ActiveRoom {
            epoch,
            session: Session::new(
                room_id,
                Some(&identity.username),
                request,
                self.config.retry_delay(),
            ),
            bootstrap,
            users: Vec::new(),
            cursors: HashMap::new(),
            chat: Vec::new(),
            applied_sequence: None,
        };
        for inbound in room.session.start(&mut self.transport, now) {
            handle_inbound(&mut room, &mut self.surface, &mut self.history, &mut self.events, inbound);
        }
        self.room = Some(room);

        self.submit(epoch, baseline)?;
        self.submit(
            epoch,
            ApiRequest::FetchChatHistory {
                room_id: room_id.to_string(),
            },
        )?;
        Ok(())
    }

    /// Leave the current room, if any.
    pub fn leave_room(&mut self) {
        let Some(mut room) = self.room.take() else {
            return;
        };
        let dropped = room.session.leave(&mut self.transport);
        log::info!(
            "Left room {} ({} unsent operation(s) dropped)",
            room.session.room_id(),
            dropped
        );
        self.epoch += 1;
        self.events
            .push(WhiteboardEvent::ConnectionChanged(ConnectionState::Disconnected));
    }

    // --- Editing ---

    /// Draw locally and share the operation with the room.
    pub fn draw(&mut self, op: DrawOp) -> SessionResult<Submitted> {
        let room = self.room.as_mut().ok_or(SessionError::NotInRoom)?;
        self.surface.paint(&op);
        self.history.record(self.surface.capture());

        let username = self.identity.as_ref().map(|identity| identity.username.as_str());
        let operation = DrawOperation::local(room.session.room_id(), username, op);
        room.bootstrap.note_local(operation.client_op_id, operation.op.clone());
        Ok(room.session.submit_draw(&mut self.transport, operation))
    }

    /// Step back through the local history. Returns false at the start.
    pub fn undo(&mut self) -> bool {
        match self.history.undo() {
            Some(frame) => {
                self.surface.restore(frame);
                true
            }
            None => false,
        }
    }

    /// Step forward through the local history. Returns false at the tail.
    pub fn redo(&mut self) -> bool {
        match self.history.redo() {
            Some(frame) => {
                self.surface.restore(frame);
                true
            }
            None => false,
        }
    }

    /// Post a chat message, showing it right away and retracting it if the
    /// send fails. Blank messages are ignored.
    pub fn send_chat(&mut self, content: &str) -> SessionResult<()> {
        let room = self.room.as_mut().ok_or(SessionError::NotInRoom)?;
        let content = content.trim();
        if content.is_empty() {
            return Ok(());
        }
        let username = self
            .identity
            .as_ref()
            .map(|identity| identity.username.clone())
            .unwrap_or_default();
        room.chat.push(ChatEntry {
            username,
            content: content.to_string(),
            client_msg_id: None,
            timestamp: None,
        });

        match room.session.send_chat(&mut self.transport, content) {
            Ok(message) => {
                if let Some(entry) = room.chat.last_mut() {
                    entry.client_msg_id = message.client_msg_id;
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("Chat not sent: {}", e);
                room.chat.pop();
                self.events.push(WhiteboardEvent::ChatFailed {
                    content: content.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Share the local cursor position. Fire and forget.
    pub fn move_cursor(&mut self, x: f64, y: f64) {
        if let Some(room) = self.room.as_mut() {
            room.session.send_cursor(&mut self.transport, x, y);
        }
    }

    /// Persist the current surface as the room's baseline.
    pub fn save_baseline(&mut self) -> SessionResult<Ticket> {
        let room = self.room.as_ref().ok_or(SessionError::NotInRoom)?;
        let png = self.surface.encode_png()?;
        let request = ApiRequest::SaveBaseline {
            room_id: room.session.room_id().to_string(),
            request: SaveSnapshotRequest {
                image_data: codec::encode_data_url(&png),
                sequence: room.applied_sequence,
            },
        };
        let epoch = room.epoch;
        Ok(self.submit(epoch, request)?)
    }

    // --- Event loop ---

    /// Drive the session and collect finished REST calls.
    pub fn poll(&mut self, now: Instant) -> Vec<WhiteboardEvent> {
        if let Some(room) = self.room.as_mut() {
            for inbound in room.session.poll(&mut self.transport, now) {
                handle_inbound(room, &mut self.surface, &mut self.history, &mut self.events, inbound);
            }
        }
        for (ticket, response) in self.dispatcher.poll() {
            self.handle_response(ticket, response);
        }
        std::mem::take(&mut self.events)
    }

    fn handle_response(&mut self, ticket: Ticket, response: ApiResponse) {
        match response {
            ApiResponse::RoomCreated(Ok(room)) => {
                log::info!("Created room {} ({})", room.room_id, room.name);
                self.events.push(WhiteboardEvent::RoomCreated(room));
            }
            ApiResponse::Rooms(Ok(rooms)) => self.events.push(WhiteboardEvent::RoomsListed(rooms)),
            ApiResponse::RoomCreated(Err(error)) => self.request_failed("create room", error),
            ApiResponse::Rooms(Err(error)) => self.request_failed("list rooms", error),
            response => self.handle_room_response(ticket, response),
        }
    }

    fn request_failed(&mut self, request: &'static str, error: ApiError) {
        log::warn!("{} failed: {}", request, error);
        self.events.push(WhiteboardEvent::RequestFailed { request, error });
    }

    fn handle_room_response(&mut self, ticket: Ticket, response: ApiResponse) {
        let Some(room) = self.room.as_mut().filter(|room| room.epoch == ticket.epoch) else {
            log::debug!("Ignoring stale response for epoch {} (now {})", ticket.epoch, self.epoch);
            return;
        };

        match response {
            ApiResponse::Baseline(result) => {
                let next = room.bootstrap.on_baseline(result, &mut self.surface, &mut self.history);
                if let ApiRequest::FetchOperations { after_sequence, .. } = &next {
                    room.saw_sequence((*after_sequence > 0).then_some(*after_sequence));
                }
                let epoch = room.epoch;
                if let Err(e) = self.submit(epoch, next) {
                    self.request_failed("fetch operations", e);
                }
            }
            ApiResponse::Operations(result) => {
                if let Err(e) = &result {
                    self.events.push(WhiteboardEvent::RequestFailed {
                        request: "fetch operations",
                        error: e.clone(),
                    });
                }
                let report = room.bootstrap.on_operations(result, &mut self.surface, &mut self.history);
                room.saw_sequence(report.highest_sequence);
                self.events.push(WhiteboardEvent::BootstrapComplete {
                    room_id: room.session.room_id().to_string(),
                    replayed: report.replayed + report.live_applied,
                    skipped: report.skipped,
                });
            }
            ApiResponse::ChatHistory(Ok(records)) => {
                let loaded = records.len();
                let live = std::mem::take(&mut room.chat);
                room.chat = records.into_iter().map(ChatEntry::from).collect();
                room.chat.extend(live);
                self.events.push(WhiteboardEvent::ChatHistoryLoaded(loaded));
            }
            ApiResponse::ChatHistory(Err(error)) => self.request_failed("fetch chat history", error),
            ApiResponse::Saved(Ok(saved)) if saved.success => {
                log::info!("Baseline saved: {}", saved.message);
                self.events.push(WhiteboardEvent::BaselineSaved(saved.message));
            }
            ApiResponse::Saved(Ok(saved)) => self.request_failed(
                "save baseline",
                ApiError::Status {
                    status: 200,
                    message: saved.message,
                },
            ),
            ApiResponse::Saved(Err(error)) => self.request_failed("save baseline", error),
            ApiResponse::RoomCreated(_) | ApiResponse::Rooms(_) => {}
        }
    }
}

impl<S: Surface, T: Transport, D: ApiDispatcher> Drop for Whiteboard<S, T, D> {
    fn drop(&mut self) {
        self.leave_room();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{InlineDispatcher, MemoryRoomApi};
    use crate::codec::{decode_payload, encode_data_url};
    use crate::operation::RectShape;
    use crate::protocol::{ClientFrame, CursorMessage, PresenceEvent, PresenceMessage, ServerFrame};
    use crate::raster::PixelSurface;
    use crate::testing::{GatedDispatcher, MockTransport, draw_frame, line_data};
    use std::time::Duration;

    type TestBoard = Whiteboard<PixelSurface, MockTransport, InlineDispatcher<MemoryRoomApi>>;

    fn board(api: &MemoryRoomApi, username: &str) -> TestBoard {
        let mut board = Whiteboard::new(
            ClientConfig::default(),
            PixelSurface::new(100, 100),
            MockTransport::new(),
            InlineDispatcher::new(api.clone()),
        );
        board.login(username, &format!("{}-token", username));
        board
    }

    fn api_with_room(room_id: &str) -> MemoryRoomApi {
        let api = MemoryRoomApi::new();
        api.add_room(room_id, "Room");
        api
    }

    /// Poll and play the server until the handshake and bootstrap settle.
    fn settle(board: &mut TestBoard, now: Instant) -> Vec<WhiteboardEvent> {
        let mut events = Vec::new();
        for _ in 0..5 {
            events.extend(board.poll(now));
            board.transport_mut().serve();
        }
        events
    }

    fn joined(api: &MemoryRoomApi, username: &str, room_id: &str, now: Instant) -> TestBoard {
        let mut board = board(api, username);
        board.join_room(room_id, now).unwrap();
        settle(&mut board, now);
        assert_eq!(board.connection_state(), ConnectionState::Joined);
        assert!(board.is_bootstrapped());
        board
    }

    fn line(y: f64) -> DrawOp {
        decode_payload("line", &line_data(y)).unwrap()
    }

    fn rectangle() -> DrawOp {
        DrawOp::Rectangle(RectShape {
            x: 10.0,
            y: 10.0,
            width: 50.0,
            height: 30.0,
            color: "#FF0000".to_string(),
            line_width: 2.0,
        })
    }

    fn sent_draws(board: &TestBoard) -> Vec<crate::codec::DrawMessage> {
        sent_draws_from(board.transport())
    }

    fn sent_draws_from(transport: &MockTransport) -> Vec<crate::codec::DrawMessage> {
        transport
            .sent_frames()
            .into_iter()
            .filter_map(|frame| match frame {
                ClientFrame::Draw(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn frame_room(frame: &ClientFrame) -> &str {
        match frame {
            ClientFrame::Subscribe(s) => s.room_id.as_str(),
            ClientFrame::Join(r) | ClientFrame::Leave(r) => r.room_id.as_str(),
            ClientFrame::Draw(m) => m.room_id.as_str(),
            ClientFrame::Chat(c) => c.room_id.as_str(),
            ClientFrame::Cursor(c) => c.room_id.as_str(),
        }
    }

    #[test]
    fn test_remote_rectangle_matches_sender() {
        let now = Instant::now();
        let api = api_with_room("r");
        let mut alice = joined(&api, "alice", "r", now);
        let mut bob = joined(&api, "bob", "r", now);

        let before = alice.history().len();
        assert_eq!(bob.draw(rectangle()).unwrap(), Submitted::Sent);
        let mut message = sent_draws(&bob).pop().unwrap();
        message.sequence = Some(1);
        alice.transport_mut().push_frame(&ServerFrame::Draw(message));

        let events = alice.poll(now);
        assert!(events.contains(&WhiteboardEvent::RemoteDraw {
            kind: OpKind::Rectangle,
            origin: Some("bob".to_string()),
        }));
        assert_eq!(alice.history().len(), before + 1);
        assert_eq!(alice.surface(), bob.surface());
        assert_eq!(alice.applied_sequence(), Some(1));
    }

    #[test]
    fn test_operations_drawn_while_connecting_are_flushed_once_in_order() {
        let now = Instant::now();
        let api = api_with_room("r");
        let mut alice = board(&api, "alice");
        alice.join_room("r", now).unwrap();
        for y in [10.0, 20.0, 30.0] {
            assert_eq!(alice.draw(line(y)).unwrap(), Submitted::Queued);
        }
        assert_eq!(alice.pending_len(), 3);

        settle(&mut alice, now);
        settle(&mut alice, now);
        let sent = sent_draws(&alice);
        assert_eq!(sent.len(), 3);
        let ys: Vec<f64> = sent
            .iter()
            .map(|m| match decode_payload(&m.kind, &m.data).unwrap() {
                DrawOp::Line(l) => l.y1,
                other => panic!("unexpected op {:?}", other),
            })
            .collect();
        assert_eq!(ys, vec![10.0, 20.0, 30.0]);
        assert_eq!(alice.pending_len(), 0);
        // The local strokes survive the (empty) baseline.
        assert_eq!(alice.history().len(), 4);
    }

    #[test]
    fn test_self_echo_is_not_applied_twice() {
        let now = Instant::now();
        let api = api_with_room("r");
        let mut alice = joined(&api, "alice", "r", now);

        alice.draw(line(40.0)).unwrap();
        let entries = alice.history().len();
        let mut echo = sent_draws(&alice).pop().unwrap();
        echo.sequence = Some(9);
        alice.transport_mut().push_frame(&ServerFrame::Draw(echo));

        // Without a correlation id the sender name decides.
        alice
            .transport_mut()
            .push_frame(&draw_frame("r", "alice", "line", &line_data(50.0)));

        let events = alice.poll(now);
        assert!(!events.iter().any(|e| matches!(e, WhiteboardEvent::RemoteDraw { .. })));
        assert_eq!(alice.history().len(), entries);
        assert_eq!(alice.applied_sequence(), Some(9));
    }

    #[test]
    fn test_bootstrap_from_baseline_matches_full_replay() {
        let now = Instant::now();
        let api = api_with_room("r");
        let ys: Vec<f64> = (1..=5).map(|i| i as f64 * 12.0).collect();
        for y in &ys {
            api.push_operation("r", "line", &line_data(*y));
        }
        let mut folded = PixelSurface::new(100, 100);
        let mut expected = PixelSurface::new(100, 100);
        for (i, y) in ys.iter().enumerate() {
            if i < 2 {
                folded.paint(&line(*y));
            }
            expected.paint(&line(*y));
        }
        api.set_baseline("r", &encode_data_url(&folded.encode_png().unwrap()), 2);

        let mut alice = board(&api, "alice");
        alice.join_room("r", now).unwrap();
        let events = settle(&mut alice, now);

        assert!(events.contains(&WhiteboardEvent::BootstrapComplete {
            room_id: "r".to_string(),
            replayed: 3,
            skipped: 0,
        }));
        assert_eq!(alice.surface(), &expected);
        assert_eq!(alice.history().len(), 4);
        assert_eq!(alice.applied_sequence(), Some(5));
        assert!(api.calls().contains(&"operations:r:2".to_string()));
    }

    #[test]
    fn test_baseline_failure_still_enters_room() {
        let now = Instant::now();
        let api = api_with_room("r");
        api.push_operation("r", "line", &line_data(10.0));
        api.fail_baseline(true);

        let alice = joined(&api, "alice", "r", now);
        assert!(!alice.surface().is_blank());
        assert_eq!(alice.history().len(), 2);
        assert!(api.calls().contains(&"operations:r:0".to_string()));
    }

    #[test]
    fn test_join_a_then_b_leaves_no_residue() {
        let now = Instant::now();
        let api = MemoryRoomApi::new();
        api.add_room("a", "A");
        api.add_room("b", "B");
        api.push_operation("a", "line", &line_data(10.0));
        api.push_chat("a", "bob", "hello from A");

        let mut alice = board(&api, "alice");
        alice.join_room("a", now).unwrap();
        alice.draw(line(30.0)).unwrap();
        assert_eq!(alice.pending_len(), 1);

        alice.join_room("b", now).unwrap();
        assert_eq!(alice.pending_len(), 0);
        assert_eq!(alice.history().len(), 1);

        let events = settle(&mut alice, now);
        assert_eq!(alice.room_id(), Some("b"));
        assert!(alice.surface().is_blank());
        assert_eq!(alice.history().len(), 1);
        assert!(alice.chat_log().is_empty());
        assert!(alice.users().is_empty());
        assert!(
            alice
                .transport()
                .sent_frames()
                .iter()
                .all(|frame| frame_room(frame) == "b")
        );
        let completions: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, WhiteboardEvent::BootstrapComplete { .. }))
            .collect();
        assert_eq!(
            completions,
            vec![&WhiteboardEvent::BootstrapComplete {
                room_id: "b".to_string(),
                replayed: 0,
                skipped: 0,
            }]
        );
    }

    #[test]
    fn test_completions_after_leave_are_ignored() {
        let now = Instant::now();
        let api = api_with_room("r");
        api.push_operation("r", "line", &line_data(10.0));

        let mut alice = board(&api, "alice");
        alice.join_room("r", now).unwrap();
        alice.leave_room();
        let events = alice.poll(now);

        assert!(!events.iter().any(|e| matches!(e, WhiteboardEvent::BootstrapComplete { .. })));
        assert!(alice.surface().is_blank());
        assert_eq!(alice.history().len(), 1);
        assert_eq!(alice.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_bad_and_foreign_operations_are_skipped() {
        let now = Instant::now();
        let api = api_with_room("r");
        let mut alice = joined(&api, "alice", "r", now);
        let entries = alice.history().len();

        let transport = alice.transport_mut();
        transport.push_frame(&draw_frame("r", "bob", "spray", "{}"));
        transport.push_frame(&draw_frame("r", "bob", "rectangle", r#"{"x":1}"#));
        transport.push_frame(&draw_frame("elsewhere", "bob", "line", &line_data(5.0)));

        let events = alice.poll(now);
        let skipped = events
            .iter()
            .filter(|e| matches!(e, WhiteboardEvent::OperationSkipped(_)))
            .count();
        assert_eq!(skipped, 2);
        assert!(!events.iter().any(|e| matches!(e, WhiteboardEvent::RemoteDraw { .. })));
        assert_eq!(alice.connection_state(), ConnectionState::Joined);
        assert_eq!(alice.history().len(), entries);
        assert!(alice.surface().is_blank());
    }

    #[test]
    fn test_failed_chat_rolls_back() {
        let now = Instant::now();
        let api = api_with_room("r");
        api.push_chat("r", "bob", "earlier");
        let mut alice = joined(&api, "alice", "r", now);
        assert_eq!(alice.chat_log().len(), 1);

        alice.transport_mut().fail_sends = 1;
        assert!(alice.send_chat("hello").is_err());
        assert_eq!(alice.chat_log().len(), 1);
        let events = alice.poll(now);
        assert!(events.iter().any(|e| matches!(e, WhiteboardEvent::ChatFailed { content, .. } if content == "hello")));

        alice.send_chat("  hello again ").unwrap();
        let last = alice.chat_log().last().unwrap();
        assert_eq!(last.content, "hello again");
        assert!(last.client_msg_id.is_some());

        alice.send_chat("   ").unwrap();
        assert_eq!(alice.chat_log().len(), 2);
    }

    #[test]
    fn test_reconnect_resubscribes_before_join() {
        let now = Instant::now();
        let api = api_with_room("r");
        let mut alice = joined(&api, "alice", "r", now);
        alice.transport_mut().take_sent();

        alice.transport_mut().drop_connection();
        let events = alice.poll(now);
        assert!(events.contains(&WhiteboardEvent::ConnectionChanged(ConnectionState::Reconnecting)));

        alice.draw(line(20.0)).unwrap();
        settle(&mut alice, now + Duration::from_secs(3));
        assert_eq!(alice.connection_state(), ConnectionState::Joined);

        let frames = alice.transport_mut().take_sent();
        let join_at = frames
            .iter()
            .position(|f| matches!(f, ClientFrame::Join(_)))
            .unwrap();
        assert_eq!(join_at, 4);
        assert!(frames[..4].iter().all(|f| matches!(f, ClientFrame::Subscribe(_))));
        assert!(matches!(frames[5], ClientFrame::Draw(_)));
        assert_eq!(alice.transport().connects, 2);
    }

    #[test]
    fn test_save_baseline_reports_applied_sequence() {
        let now = Instant::now();
        let api = api_with_room("r");
        let mut alice = joined(&api, "alice", "r", now);

        let mut remote = match draw_frame("r", "bob", "line", &line_data(25.0)) {
            ServerFrame::Draw(message) => message,
            _ => unreachable!(),
        };
        remote.sequence = Some(7);
        alice.transport_mut().push_frame(&ServerFrame::Draw(remote));
        alice.poll(now);

        alice.save_baseline().unwrap();
        let events = alice.poll(now);
        assert!(events.iter().any(|e| matches!(e, WhiteboardEvent::BaselineSaved(_))));
        let saved = api.baseline("r").unwrap();
        assert_eq!(saved.sequence, Some(7));
        assert!(saved.image_data.starts_with(crate::codec::PNG_DATA_URL_PREFIX));
    }

    #[test]
    fn test_presence_and_cursors() {
        let now = Instant::now();
        let api = api_with_room("r");
        let mut alice = joined(&api, "alice", "r", now);

        let presence = |users: &[&str]| {
            ServerFrame::Users(PresenceMessage {
                room_id: "r".to_string(),
                username: "bob".to_string(),
                event: PresenceEvent::Joined,
                users: users
                    .iter()
                    .map(|name| UserPresence {
                        username: name.to_string(),
                        user_id: None,
                    })
                    .collect(),
            })
        };
        let transport = alice.transport_mut();
        transport.push_frame(&presence(&["alice", "bob"]));
        transport.push_frame(&ServerFrame::Cursor(CursorMessage {
            room_id: "r".to_string(),
            x: 3.0,
            y: 4.0,
            username: Some("bob".to_string()),
        }));
        alice.poll(now);
        assert_eq!(alice.users().len(), 2);
        assert_eq!(alice.cursors().unwrap().get("bob"), Some(&Point::new(3.0, 4.0)));

        alice.transport_mut().push_frame(&presence(&["alice"]));
        alice.poll(now);
        assert_eq!(alice.users().len(), 1);
        assert!(alice.cursors().unwrap().is_empty());

        alice.move_cursor(1.0, 2.0);
        assert!(matches!(
            alice.transport_mut().take_sent().last(),
            Some(ClientFrame::Cursor(c)) if c.x == 1.0
        ));
    }

    #[test]
    fn test_local_undo_redo() {
        let now = Instant::now();
        let api = api_with_room("r");
        let mut alice = joined(&api, "alice", "r", now);

        let blank = alice.surface().clone();
        alice.draw(line(10.0)).unwrap();
        alice.draw(line(20.0)).unwrap();
        let drawn = alice.surface().clone();
        assert!(alice.undo());
        assert!(alice.undo());
        assert!(!alice.undo());
        assert_eq!(alice.surface(), &blank);
        assert!(alice.redo());
        assert!(alice.redo());
        assert!(!alice.redo());
        assert_eq!(alice.surface(), &drawn);
        assert_eq!(alice.history_cursor(), 2);
    }

    #[test]
    fn test_requests_need_login() {
        let api = api_with_room("r");
        let mut guest = Whiteboard::new(
            ClientConfig::default(),
            PixelSurface::new(10, 10),
            MockTransport::new(),
            InlineDispatcher::new(api),
        );
        assert!(matches!(
            guest.join_room("r", Instant::now()),
            Err(SessionError::Api(ApiError::NotAuthenticated))
        ));
        assert_eq!(guest.create_room("x"), Err(ApiError::NotAuthenticated));
        assert!(matches!(guest.draw(DrawOp::Clear), Err(SessionError::NotInRoom)));
    }

    #[test]
    fn test_create_and_list_rooms() {
        let api = MemoryRoomApi::new();
        let mut alice = board(&api, "alice");
        alice.create_room("Sketches").unwrap();
        alice.list_rooms().unwrap();
        let events = alice.poll(Instant::now());
        match events.as_slice() {
            [WhiteboardEvent::RoomCreated(created), WhiteboardEvent::RoomsListed(rooms)] => {
                assert_eq!(created.name, "Sketches");
                assert_eq!(rooms[0].room_id, created.room_id);
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    type GatedBoard = Whiteboard<PixelSurface, MockTransport, GatedDispatcher<MemoryRoomApi>>;

    /// Joined over the socket, with every REST call still held.
    fn joined_gated(api: &MemoryRoomApi, username: &str, now: Instant) -> GatedBoard {
        let mut board = Whiteboard::new(
            ClientConfig::default(),
            PixelSurface::new(100, 100),
            MockTransport::new(),
            GatedDispatcher::new(api.clone()),
        );
        board.login(username, &format!("{}-token", username));
        board.join_room("r", now).unwrap();
        for _ in 0..5 {
            board.poll(now);
            board.transport_mut().serve();
        }
        assert_eq!(board.connection_state(), ConnectionState::Joined);
        assert!(!board.is_bootstrapped());
        board
    }

    /// Let the held calls complete and handle their results.
    fn release(board: &mut GatedBoard, now: Instant) {
        board.dispatcher_mut().release();
        board.poll(now);
    }

    /// Persist this client's last draw the way the server would.
    fn store_last_draw(api: &MemoryRoomApi, board: &GatedBoard) -> crate::codec::DrawMessage {
        let mut message = sent_draws_from(board.transport()).pop().unwrap();
        message.sequence = Some(api.push_draw(&message));
        message
    }


    #[test]
    fn test_draw_before_baseline_lands_is_painted_once() {
        let now = Instant::now();
        let api = api_with_room("r");
        let mut alice = joined_gated(&api, "alice", now);

        assert_eq!(alice.draw(line(40.0)).unwrap(), Submitted::Sent);
        let echo = store_last_draw(&api, &alice);
        assert_eq!(echo.sequence, Some(1));
        alice.transport_mut().push_frame(&ServerFrame::Draw(echo));
        alice.poll(now);

        release(&mut alice, now);
        assert_eq!(alice.dispatcher().held(), 1);
        release(&mut alice, now);
        assert!(alice.is_bootstrapped());

        assert_eq!(alice.history().len(), 2);
        assert_eq!(alice.applied_sequence(), Some(1));
        assert!(alice.undo());
        assert!(alice.surface().is_blank());
    }

    #[test]
    fn test_draw_during_operation_fetch_is_painted_once() {
        let now = Instant::now();
        let api = api_with_room("r");
        api.push_operation("r", "line", &line_data(10.0));
        let mut alice = joined_gated(&api, "alice", now);

        // Baseline lands; the operations fetch is still held.
        release(&mut alice, now);
        assert!(!alice.is_bootstrapped());

        alice.draw(line(40.0)).unwrap();
        let echo = store_last_draw(&api, &alice);
        assert_eq!(echo.sequence, Some(2));

        // The stored copy comes back before the echo does.
        release(&mut alice, now);
        assert!(alice.is_bootstrapped());
        assert_eq!(alice.history().len(), 3);
        assert_eq!(alice.applied_sequence(), Some(2));

        alice.transport_mut().push_frame(&ServerFrame::Draw(echo));
        alice.poll(now);
        assert_eq!(alice.history().len(), 3);

        // Undo the remote line, then our own: back to blank.
        assert!(alice.undo());
        assert!(alice.undo());
        assert!(alice.surface().is_blank());
        assert!(!alice.undo());
    }
}
