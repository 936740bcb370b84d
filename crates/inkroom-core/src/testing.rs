//! Test doubles shared by the unit tests.

use std::collections::VecDeque;

use crate::api::dispatch::execute;
use crate::api::{ApiDispatcher, ApiRequest, ApiResponse, RoomApi, Ticket};
use crate::codec::{self, DrawMessage};
use crate::operation::{DrawOp, LineShape};
use crate::protocol::{ClientFrame, ServerFrame};
use crate::transport::{ConnectRequest, Transport, TransportError, TransportEvent};

/// Scripted transport. Connecting succeeds immediately unless `fail_connect`
/// is set; outbound frames are captured; inbound events are queued by hand
/// or by [`MockTransport::serve`], which plays the server's acknowledgments.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub open: bool,
    pub connects: usize,
    pub disconnects: usize,
    pub fail_connect: bool,
    /// Number of upcoming sends to reject.
    pub fail_sends: usize,
    pub last_request: Option<ConnectRequest>,
    pub inbound: VecDeque<TransportEvent>,
    sent: Vec<String>,
    unserved: VecDeque<String>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frame(&mut self, frame: &ServerFrame) {
        let json = frame.to_json().unwrap();
        self.inbound.push_back(TransportEvent::Text(json));
    }

    /// Simulate a dropped connection.
    pub fn drop_connection(&mut self) {
        self.inbound
            .push_back(TransportEvent::Error("connection reset".to_string()));
    }

    /// Every frame sent so far.
    pub fn sent_frames(&self) -> Vec<ClientFrame> {
        self.sent
            .iter()
            .map(|json| ClientFrame::from_json(json).unwrap())
            .collect()
    }

    /// Frames sent since the last call.
    pub fn take_sent(&mut self) -> Vec<ClientFrame> {
        let frames = self.sent_frames();
        self.sent.clear();
        frames
    }

    /// Acknowledge every subscribe and join sent since the last call.
    pub fn serve(&mut self) {
        while let Some(json) = self.unserved.pop_front() {
            match ClientFrame::from_json(&json).unwrap() {
                ClientFrame::Subscribe(subscription) => {
                    self.push_frame(&ServerFrame::Subscribed(subscription))
                }
                ClientFrame::Join(room) => self.push_frame(&ServerFrame::Joined(room)),
                _ => {}
            }
        }
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, request: &ConnectRequest) -> Result<(), TransportError> {
        if self.fail_connect {
            return Err(TransportError::Handshake("refused".to_string()));
        }
        self.connects += 1;
        self.last_request = Some(request.clone());
        self.inbound.push_back(TransportEvent::Connected);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
        self.open = false;
        self.inbound.clear();
        self.unserved.clear();
    }

    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        if self.fail_sends > 0 {
            self.fail_sends -= 1;
            return Err(TransportError::Send("injected failure".to_string()));
        }
        self.sent.push(text.to_string());
        self.unserved.push_back(text.to_string());
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let events: Vec<TransportEvent> = self.inbound.drain(..).collect();
        for event in &events {
            match event {
                TransportEvent::Connected => self.open = true,
                TransportEvent::Closed | TransportEvent::Error(_) => self.open = false,
                _ => {}
            }
        }
        events
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Dispatcher that holds calls until the test releases them. Calls run at
/// release time, so they see whatever the store holds by then.
pub struct GatedDispatcher<A> {
    api: A,
    held: Vec<(Ticket, String, ApiRequest)>,
    ready: Vec<(Ticket, ApiResponse)>,
}

impl<A: RoomApi> GatedDispatcher<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            held: Vec::new(),
            ready: Vec::new(),
        }
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Run the calls submitted so far; their results arrive on the next poll.
    pub fn release(&mut self) {
        for (ticket, token, request) in self.held.drain(..) {
            self.ready.push((ticket, execute(&self.api, &token, request)));
        }
    }
}

impl<A: RoomApi> ApiDispatcher for GatedDispatcher<A> {
    fn submit(&mut self, ticket: Ticket, token: String, request: ApiRequest) {
        self.held.push((ticket, token, request));
    }

    fn poll(&mut self) -> Vec<(Ticket, ApiResponse)> {
        std::mem::take(&mut self.ready)
    }
}

/// Payload of a black horizontal line at height `y`.
pub fn line_data(y: f64) -> String {
    codec::encode_payload(&DrawOp::Line(LineShape {
        x1: 0.0,
        y1: y,
        x2: 60.0,
        y2: y,
        color: "#000000".to_string(),
        line_width: 2.0,
    }))
    .unwrap()
}

/// A draw broadcast from another participant.
pub fn draw_frame(room_id: &str, username: &str, kind: &str, data: &str) -> ServerFrame {
    ServerFrame::Draw(DrawMessage {
        room_id: room_id.to_string(),
        kind: kind.to_string(),
        data: data.to_string(),
        username: Some(username.to_string()),
        client_op_id: None,
        sequence: None,
    })
}
