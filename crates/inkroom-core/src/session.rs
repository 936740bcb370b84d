//! Session / connection state machine.
//!
//! A [`Session`] is one client's membership of one room over the real-time
//! channel. It drives the transport through
//! `Disconnected → Connecting → Connected → Joined`, falling back to
//! `Reconnecting` after any transport failure and retrying with a constant
//! delay until the room is left.
//!
//! Sequencing is acknowledgment driven: the join announcement goes out once
//! the server has acknowledged every subscription, and queued operations are
//! flushed once the server has confirmed the join.

use std::collections::HashSet;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

use crate::api::ApiError;
use crate::applier::EchoFilter;
use crate::codec::{self, CodecError, DrawMessage};
use crate::operation::DrawOperation;
use crate::pending::{FlushReport, PendingQueue};
use crate::protocol::{
    ChatMessage, ClientFrame, CursorMessage, PresenceMessage, RoomRef, ServerFrame, Subscription,
    Topic,
};
use crate::surface::SurfaceError;
use crate::transport::{ConnectRequest, Transport, TransportError, TransportEvent};

/// Cursor updates from these users are never shown.
const ANONYMOUS: &str = "anonymous";

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not in a room")]
    NotInRoom,
    #[error("not connected to the room")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Transport open, subscriptions being established.
    Connected,
    /// Join confirmed by the server.
    Joined,
    /// Waiting for the retry delay after a failure.
    Reconnecting,
}

/// Inbound traffic routed to the owner of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    StateChanged(ConnectionState),
    /// The server confirmed the join.
    Joined,
    /// A draw operation from another participant.
    Draw(DrawMessage),
    /// One of this client's operations came back from the server.
    Echo {
        client_op_id: Option<Uuid>,
        sequence: Option<u64>,
    },
    Chat(ChatMessage),
    Cursor(CursorMessage),
    Users(PresenceMessage),
    ServerError(String),
}

/// What happened to a submitted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Sent,
    Queued,
}

fn send_frame<T: Transport>(transport: &mut T, frame: &ClientFrame) -> SessionResult<()> {
    let json = frame.to_json()?;
    transport.send(&json)?;
    Ok(())
}

fn send_operation<T: Transport>(transport: &mut T, operation: &DrawOperation) -> SessionResult<()> {
    send_frame(transport, &ClientFrame::Draw(codec::encode(operation)?))
}

/// One room membership over the real-time channel.
#[derive(Debug)]
pub struct Session {
    room_id: String,
    local_identity: Option<String>,
    request: ConnectRequest,
    retry_delay: Duration,
    state: ConnectionState,
    retry_at: Option<Instant>,
    /// Topics the server has acknowledged on the current connection.
    acked: HashSet<Topic>,
    pending: PendingQueue,
    draw_echo: EchoFilter,
    chat_echo: EchoFilter,
}

impl Session {
    pub fn new(
        room_id: &str,
        local_identity: Option<&str>,
        request: ConnectRequest,
        retry_delay: Duration,
    ) -> Self {
        Self {
            room_id: room_id.to_string(),
            local_identity: local_identity.map(str::to_string),
            request,
            retry_delay,
            state: ConnectionState::Disconnected,
            retry_at: None,
            acked: HashSet::new(),
            pending: PendingQueue::new(),
            draw_echo: EchoFilter::new(local_identity),
            chat_echo: EchoFilter::new(local_identity),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_joined(&self) -> bool {
        self.state == ConnectionState::Joined
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// When the next connection attempt is due, if one is scheduled.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Topics acknowledged on the current connection.
    pub fn subscriptions(&self) -> Vec<Topic> {
        Topic::ALL
            .into_iter()
            .filter(|topic| self.acked.contains(topic))
            .collect()
    }

    // --- Lifecycle ---

    /// Begin connecting.
    pub fn start<T: Transport>(&mut self, transport: &mut T, now: Instant) -> Vec<Inbound> {
        let mut out = Vec::new();
        self.connect(transport, now, &mut out);
        out
    }

    /// Drive the state machine: fire a due retry, then process transport events.
    pub fn poll<T: Transport>(&mut self, transport: &mut T, now: Instant) -> Vec<Inbound> {
        let mut out = Vec::new();
        if self.state == ConnectionState::Reconnecting
            && self.retry_at.is_some_and(|at| at <= now)
        {
            log::info!("Session {}: retrying connection", self.room_id);
            self.connect(transport, now, &mut out);
        }

        if self.state == ConnectionState::Disconnected {
            return out;
        }
        for event in transport.poll_events() {
            let failed = self.handle_event(transport, event, now, &mut out);
            if failed {
                // The rest of the batch belongs to the torn-down connection.
                break;
            }
        }
        out
    }

    /// Leave the room: flush what can still be sent, announce the leave,
    /// tear the transport down and drop whatever is still queued.
    ///
    /// Returns the number of operations dropped.
    pub fn leave<T: Transport>(&mut self, transport: &mut T) -> usize {
        if self.state == ConnectionState::Joined {
            self.flush(transport);
            let frame = ClientFrame::Leave(RoomRef {
                room_id: self.room_id.clone(),
            });
            if let Err(e) = send_frame(transport, &frame) {
                log::warn!("Session {}: leave announcement not sent: {}", self.room_id, e);
            }
        }
        transport.disconnect();
        self.acked.clear();
        self.retry_at = None;
        self.draw_echo.forget_all();
        self.chat_echo.forget_all();
        if self.state != ConnectionState::Disconnected {
            log::info!("Session {}: {:?} -> Disconnected (leave)", self.room_id, self.state);
            self.state = ConnectionState::Disconnected;
        }
        self.pending.drain_on_leave()
    }

    // --- Outbound ---

    /// Send a local operation, or queue it until the session is joined.
    pub fn submit_draw<T: Transport>(
        &mut self,
        transport: &mut T,
        operation: DrawOperation,
    ) -> Submitted {
        if let Some(id) = operation.client_op_id {
            self.draw_echo.remember(id);
        }
        if self.state != ConnectionState::Joined {
            log::debug!(
                "Session {}: queueing {} while {:?}",
                self.room_id,
                operation.kind(),
                self.state
            );
            self.pending.enqueue(operation);
            return Submitted::Queued;
        }
        match send_operation(transport, &operation) {
            Ok(()) => Submitted::Sent,
            Err(e) => {
                log::warn!("Session {}: send failed, queueing: {}", self.room_id, e);
                self.pending.enqueue(operation);
                Submitted::Queued
            }
        }
    }

    /// Send a chat message. Chat is never queued.
    pub fn send_chat<T: Transport>(
        &mut self,
        transport: &mut T,
        content: &str,
    ) -> SessionResult<ChatMessage> {
        if self.state != ConnectionState::Joined {
            return Err(SessionError::NotConnected);
        }
        let id = Uuid::new_v4();
        let message = ChatMessage {
            room_id: self.room_id.clone(),
            content: content.to_string(),
            username: self.local_identity.clone(),
            client_msg_id: Some(id),
        };
        self.chat_echo.remember(id);
        if let Err(e) = send_frame(transport, &ClientFrame::Chat(message.clone())) {
            self.chat_echo.forget(id);
            return Err(e);
        }
        Ok(message)
    }

    /// Send a cursor position. Dropped unless joined; failures are ignored.
    pub fn send_cursor<T: Transport>(&mut self, transport: &mut T, x: f64, y: f64) {
        if self.state != ConnectionState::Joined {
            return;
        }
        let frame = ClientFrame::Cursor(CursorMessage {
            room_id: self.room_id.clone(),
            x,
            y,
            username: self.local_identity.clone(),
        });
        if let Err(e) = send_frame(transport, &frame) {
            log::debug!("Session {}: cursor update dropped: {}", self.room_id, e);
        }
    }

    // --- Internals ---

    fn set_state(&mut self, state: ConnectionState, out: &mut Vec<Inbound>) {
        if self.state != state {
            log::info!("Session {}: {:?} -> {:?}", self.room_id, self.state, state);
            self.state = state;
            out.push(Inbound::StateChanged(state));
        }
    }

    fn connect<T: Transport>(&mut self, transport: &mut T, now: Instant, out: &mut Vec<Inbound>) {
        self.retry_at = None;
        self.acked.clear();
        self.set_state(ConnectionState::Connecting, out);
        if let Err(e) = transport.connect(&self.request) {
            log::error!("Session {}: connect failed: {}", self.room_id, e);
            self.fail(transport, now, out);
        }
    }

    /// Full reset after a failure, then schedule a retry.
    fn fail<T: Transport>(&mut self, transport: &mut T, now: Instant, out: &mut Vec<Inbound>) {
        transport.disconnect();
        self.acked.clear();
        self.retry_at = Some(now + self.retry_delay);
        log::warn!(
            "Session {}: retrying in {}ms",
            self.room_id,
            self.retry_delay.as_millis()
        );
        self.set_state(ConnectionState::Reconnecting, out);
    }

    fn flush<T: Transport>(&mut self, transport: &mut T) -> FlushReport {
        self.pending.flush(|operation| send_operation(transport, operation))
    }

    /// Returns true when the event tore the connection down.
    fn handle_event<T: Transport>(
        &mut self,
        transport: &mut T,
        event: TransportEvent,
        now: Instant,
        out: &mut Vec<Inbound>,
    ) -> bool {
        match event {
            TransportEvent::Connected => {
                if self.state != ConnectionState::Connecting {
                    log::debug!("Session {}: unexpected Connected in {:?}", self.room_id, self.state);
                    return false;
                }
                self.set_state(ConnectionState::Connected, out);
                for topic in Topic::ALL {
                    let frame = ClientFrame::Subscribe(Subscription {
                        topic,
                        room_id: self.room_id.clone(),
                    });
                    if let Err(e) = send_frame(transport, &frame) {
                        log::error!("Session {}: subscribe {:?} failed: {}", self.room_id, topic, e);
                        self.fail(transport, now, out);
                        return true;
                    }
                }
                false
            }
            TransportEvent::Text(text) => match ServerFrame::from_json(&text) {
                Ok(frame) => self.handle_frame(transport, frame, now, out),
                Err(e) => {
                    log::warn!("Session {}: ignoring unreadable frame: {}", self.room_id, e);
                    false
                }
            },
            TransportEvent::SendFailed(text) => {
                self.recover_unsent(&text);
                false
            }
            TransportEvent::Closed => {
                log::warn!("Session {}: connection closed", self.room_id);
                self.fail(transport, now, out);
                true
            }
            TransportEvent::Error(e) => {
                log::error!("Session {}: transport error: {}", self.room_id, e);
                self.fail(transport, now, out);
                true
            }
        }
    }

    /// Put a draw frame the transport could not write back in the queue.
    fn recover_unsent(&mut self, text: &str) {
        match ClientFrame::from_json(text) {
            Ok(ClientFrame::Draw(message)) => match codec::decode(&message) {
                Ok(operation) => {
                    log::info!("Session {}: requeueing unsent {}", self.room_id, operation.kind());
                    self.pending.enqueue(operation);
                }
                Err(e) => log::warn!("Session {}: unsent draw unreadable: {}", self.room_id, e),
            },
            Ok(other) => log::debug!("Session {}: unsent frame dropped: {:?}", self.room_id, other),
            Err(e) => log::warn!("Session {}: unsent frame unreadable: {}", self.room_id, e),
        }
    }

    fn handle_frame<T: Transport>(
        &mut self,
        transport: &mut T,
        frame: ServerFrame,
        now: Instant,
        out: &mut Vec<Inbound>,
    ) -> bool {
        match frame {
            ServerFrame::Subscribed(subscription) => {
                if subscription.room_id != self.room_id || self.state != ConnectionState::Connected {
                    log::debug!("Session {}: stray ack {:?}", self.room_id, subscription);
                    return false;
                }
                self.acked.insert(subscription.topic);
                if self.acked.len() == Topic::ALL.len() {
                    log::info!("Session {}: subscriptions ready, joining", self.room_id);
                    let frame = ClientFrame::Join(RoomRef {
                        room_id: self.room_id.clone(),
                    });
                    if let Err(e) = send_frame(transport, &frame) {
                        log::error!("Session {}: join failed: {}", self.room_id, e);
                        self.fail(transport, now, out);
                        return true;
                    }
                }
            }
            ServerFrame::Joined(room) => {
                if room.room_id != self.room_id || self.state != ConnectionState::Connected {
                    log::debug!("Session {}: stray join ack for {}", self.room_id, room.room_id);
                    return false;
                }
                self.set_state(ConnectionState::Joined, out);
                out.push(Inbound::Joined);
                self.flush(transport);
            }
            ServerFrame::Draw(message) => {
                if message.room_id != self.room_id {
                    log::debug!("Session {}: dropping draw for {}", self.room_id, message.room_id);
                } else if self
                    .draw_echo
                    .is_self_echo(message.client_op_id, message.username.as_deref())
                {
                    log::debug!("Session {}: own {} echoed", self.room_id, message.kind);
                    out.push(Inbound::Echo {
                        client_op_id: message.client_op_id,
                        sequence: message.sequence,
                    });
                } else {
                    out.push(Inbound::Draw(message));
                }
            }
            ServerFrame::Chat(message) => {
                if message.room_id != self.room_id {
                    log::debug!("Session {}: dropping chat for {}", self.room_id, message.room_id);
                } else if message.username.as_deref().is_none_or(str::is_empty) {
                    log::warn!("Session {}: dropping chat without sender", self.room_id);
                } else if self
                    .chat_echo
                    .is_self_echo(message.client_msg_id, message.username.as_deref())
                {
                    log::debug!("Session {}: own chat echoed", self.room_id);
                } else {
                    out.push(Inbound::Chat(message));
                }
            }
            ServerFrame::Cursor(cursor) => {
                let sender = cursor.username.as_deref().unwrap_or_default();
                if cursor.room_id != self.room_id
                    || sender.is_empty()
                    || sender == ANONYMOUS
                    || Some(sender) == self.local_identity.as_deref()
                {
                    return false;
                }
                out.push(Inbound::Cursor(cursor));
            }
            ServerFrame::Users(presence) => {
                if presence.room_id != self.room_id {
                    log::debug!("Session {}: dropping users for {}", self.room_id, presence.room_id);
                    return false;
                }
                out.push(Inbound::Users(presence));
            }
            ServerFrame::Error(body) => {
                log::warn!("Session {}: server error: {}", self.room_id, body.message);
                out.push(Inbound::ServerError(body.message));
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::DrawOp;
    use crate::protocol::{PresenceEvent, UserPresence};
    use crate::testing::{MockTransport, draw_frame};

    fn session() -> Session {
        let request = ConnectRequest {
            url: "ws://localhost/ws?token=t".to_string(),
            token: Some("t".to_string()),
            protocol: "inkroom.v1".to_string(),
        };
        Session::new("room-1", Some("alice"), request, Duration::from_millis(2000))
    }

    fn join(session: &mut Session, transport: &mut MockTransport, now: Instant) {
        session.start(transport, now);
        for _ in 0..3 {
            session.poll(transport, now);
            transport.serve();
        }
        session.poll(transport, now);
        assert_eq!(session.state(), ConnectionState::Joined);
    }

    fn clear_op() -> DrawOperation {
        DrawOperation::local("room-1", Some("alice"), DrawOp::Clear)
    }

    #[test]
    fn test_subscribes_before_join() {
        let now = Instant::now();
        let mut transport = MockTransport::new();
        let mut session = session();
        let events = session.start(&mut transport, now);
        assert_eq!(events, vec![Inbound::StateChanged(ConnectionState::Connecting)]);

        let events = session.poll(&mut transport, now);
        assert_eq!(events, vec![Inbound::StateChanged(ConnectionState::Connected)]);
        let sent = transport.take_sent();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|f| matches!(f, ClientFrame::Subscribe(_))));

        // Three of four acks: no join yet.
        for topic in [Topic::Draw, Topic::Chat, Topic::Cursor] {
            transport.push_frame(&ServerFrame::Subscribed(Subscription {
                topic,
                room_id: "room-1".to_string(),
            }));
        }
        session.poll(&mut transport, now);
        assert!(transport.take_sent().is_empty());
        assert_eq!(session.subscriptions().len(), 3);

        transport.push_frame(&ServerFrame::Subscribed(Subscription {
            topic: Topic::Presence,
            room_id: "room-1".to_string(),
        }));
        session.poll(&mut transport, now);
        assert!(matches!(transport.take_sent().as_slice(), [ClientFrame::Join(_)]));
        assert_eq!(session.state(), ConnectionState::Connected);

        transport.push_frame(&ServerFrame::Joined(RoomRef {
            room_id: "room-1".to_string(),
        }));
        let events = session.poll(&mut transport, now);
        assert_eq!(
            events,
            vec![Inbound::StateChanged(ConnectionState::Joined), Inbound::Joined]
        );
    }

    #[test]
    fn test_queued_operations_flush_once_in_order_after_join() {
        let now = Instant::now();
        let mut transport = MockTransport::new();
        let mut session = session();
        let ops: Vec<DrawOperation> = (0..3).map(|_| clear_op()).collect();
        for op in &ops {
            assert_eq!(session.submit_draw(&mut transport, op.clone()), Submitted::Queued);
        }
        assert_eq!(session.pending_len(), 3);

        join(&mut session, &mut transport, now);
        let draws: Vec<_> = transport
            .sent_frames()
            .into_iter()
            .filter_map(|f| match f {
                ClientFrame::Draw(m) => m.client_op_id,
                _ => None,
            })
            .collect();
        let expected: Vec<_> = ops.iter().map(|op| op.client_op_id.unwrap()).collect();
        assert_eq!(draws, expected);
        assert_eq!(session.pending_len(), 0);

        // Join confirmation arrives after the join frame, flush after that.
        let frames = transport.sent_frames();
        let join_at = frames.iter().position(|f| matches!(f, ClientFrame::Join(_))).unwrap();
        let first_draw = frames.iter().position(|f| matches!(f, ClientFrame::Draw(_))).unwrap();
        assert!(join_at < first_draw);
    }

    #[test]
    fn test_send_failure_requeues() {
        let now = Instant::now();
        let mut transport = MockTransport::new();
        let mut session = session();
        join(&mut session, &mut transport, now);

        transport.fail_sends = 1;
        assert_eq!(session.submit_draw(&mut transport, clear_op()), Submitted::Queued);
        assert_eq!(session.submit_draw(&mut transport, clear_op()), Submitted::Sent);
        assert_eq!(session.pending_len(), 1);
    }

    #[test]
    fn test_unsent_draw_frames_are_requeued() {
        let now = Instant::now();
        let mut transport = MockTransport::new();
        let mut session = session();
        join(&mut session, &mut transport, now);

        let op = clear_op();
        session.submit_draw(&mut transport, op.clone());
        let frame = ClientFrame::Draw(codec::encode(&op).unwrap()).to_json().unwrap();
        transport.inbound.push_back(TransportEvent::SendFailed(frame));
        transport.inbound.push_back(TransportEvent::Error("broken pipe".to_string()));
        session.poll(&mut transport, now);
        assert_eq!(session.pending_len(), 1);
        assert_eq!(session.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn test_connect_failure_retries_after_delay() {
        let now = Instant::now();
        let mut transport = MockTransport::new();
        transport.fail_connect = true;
        let mut session = session();
        let events = session.start(&mut transport, now);
        assert_eq!(
            events,
            vec![
                Inbound::StateChanged(ConnectionState::Connecting),
                Inbound::StateChanged(ConnectionState::Reconnecting)
            ]
        );
        assert_eq!(session.retry_at(), Some(now + Duration::from_millis(2000)));

        transport.fail_connect = false;
        session.poll(&mut transport, now + Duration::from_millis(1999));
        assert_eq!(transport.connects, 0);
        assert_eq!(session.state(), ConnectionState::Reconnecting);

        session.poll(&mut transport, now + Duration::from_millis(2000));
        assert_eq!(transport.connects, 1);
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_reconnect_resubscribes_before_join() {
        let now = Instant::now();
        let mut transport = MockTransport::new();
        let mut session = session();
        join(&mut session, &mut transport, now);
        transport.take_sent();

        transport.drop_connection();
        session.poll(&mut transport, now);
        assert_eq!(session.state(), ConnectionState::Reconnecting);
        assert!(session.subscriptions().is_empty());

        session.submit_draw(&mut transport, clear_op());
        let later = now + Duration::from_secs(3);
        session.poll(&mut transport, later);
        for _ in 0..3 {
            transport.serve();
            session.poll(&mut transport, later);
        }
        assert_eq!(session.state(), ConnectionState::Joined);

        let frames = transport.take_sent();
        let kinds: Vec<&str> = frames
            .iter()
            .map(|f| match f {
                ClientFrame::Subscribe(_) => "subscribe",
                ClientFrame::Join(_) => "join",
                ClientFrame::Draw(_) => "draw",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["subscribe", "subscribe", "subscribe", "subscribe", "join", "draw"]
        );
    }

    #[test]
    fn test_inbound_routing_filters_room_and_echoes() {
        let now = Instant::now();
        let mut transport = MockTransport::new();
        let mut session = session();
        join(&mut session, &mut transport, now);

        let own = clear_op();
        session.submit_draw(&mut transport, own.clone());
        let mut echo = codec::encode(&own).unwrap();
        echo.sequence = Some(4);
        transport.push_frame(&ServerFrame::Draw(echo));
        transport.push_frame(&draw_frame("room-2", "bob", "clear", "{}"));
        transport.push_frame(&draw_frame("room-1", "bob", "clear", "{}"));
        transport.push_frame(&ServerFrame::Cursor(CursorMessage {
            room_id: "room-1".to_string(),
            x: 1.0,
            y: 2.0,
            username: Some("anonymous".to_string()),
        }));
        transport.push_frame(&ServerFrame::Cursor(CursorMessage {
            room_id: "room-1".to_string(),
            x: 1.0,
            y: 2.0,
            username: Some("alice".to_string()),
        }));
        transport.push_frame(&ServerFrame::Chat(ChatMessage {
            room_id: "room-1".to_string(),
            content: "no sender".to_string(),
            username: None,
            client_msg_id: None,
        }));
        transport.push_frame(&ServerFrame::Users(PresenceMessage {
            room_id: "room-2".to_string(),
            username: "bob".to_string(),
            event: PresenceEvent::Joined,
            users: vec![UserPresence {
                username: "bob".to_string(),
                user_id: Some(1),
            }],
        }));

        let events = session.poll(&mut transport, now);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            Inbound::Echo {
                client_op_id: own.client_op_id,
                sequence: Some(4),
            }
        );
        assert!(matches!(&events[1], Inbound::Draw(m) if m.username.as_deref() == Some("bob")));
    }

    #[test]
    fn test_chat_requires_join_and_suppresses_own_echo() {
        let now = Instant::now();
        let mut transport = MockTransport::new();
        let mut session = session();
        assert!(matches!(
            session.send_chat(&mut transport, "hi"),
            Err(SessionError::NotConnected)
        ));

        join(&mut session, &mut transport, now);
        let sent = session.send_chat(&mut transport, "hi").unwrap();
        transport.push_frame(&ServerFrame::Chat(sent));
        assert!(session.poll(&mut transport, now).is_empty());

        transport.fail_sends = 1;
        assert!(matches!(
            session.send_chat(&mut transport, "lost"),
            Err(SessionError::Transport(_))
        ));
    }

    #[test]
    fn test_leave_flushes_then_announces_and_drains() {
        let now = Instant::now();
        let mut transport = MockTransport::new();
        let mut session = session();
        join(&mut session, &mut transport, now);
        transport.take_sent();

        // One operation stuck in the queue from an earlier failure.
        transport.fail_sends = 1;
        session.submit_draw(&mut transport, clear_op());
        assert_eq!(session.leave(&mut transport), 0);
        let frames = transport.take_sent();
        assert!(matches!(frames.as_slice(), [ClientFrame::Draw(_), ClientFrame::Leave(_)]));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(transport.disconnects, 1);

        // Leaving while disconnected drops the queue.
        let mut offline = self::session();
        offline.submit_draw(&mut transport, clear_op());
        offline.submit_draw(&mut transport, clear_op());
        assert_eq!(offline.leave(&mut transport), 2);
        assert_eq!(offline.pending_len(), 0);
    }
}
