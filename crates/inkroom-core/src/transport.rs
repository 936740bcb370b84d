//! WebSocket transport.
//!
//! The session state machine talks to the real-time channel through the
//! [`Transport`] trait. Transports never block the caller: connecting and
//! reading happen elsewhere and surface as [`TransportEvent`]s that the owner
//! drains with `poll_events()`.

use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("send failed: {0}")]
    Send(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Everything needed to open the real-time channel.
///
/// The bearer token travels twice: once as the `token` query parameter already
/// embedded in `url`, and once as an `Authorization` header. Some proxies
/// strip one or the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub token: Option<String>,
    pub protocol: String,
}

/// Events produced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Connected,
    /// A text frame arrived.
    Text(String),
    /// A frame accepted by `send` could not be written to the socket.
    SendFailed(String),
    /// The connection closed.
    Closed,
    /// The connection failed.
    Error(String),
}

/// A non-blocking message channel.
pub trait Transport {
    /// Start connecting. Completion is reported as [`TransportEvent::Connected`].
    fn connect(&mut self, request: &ConnectRequest) -> Result<(), TransportError>;

    /// Tear the connection down. Events not yet polled are discarded.
    fn disconnect(&mut self);

    /// Queue a text frame for sending.
    fn send(&mut self, text: &str) -> Result<(), TransportError>;

    /// Drain pending events.
    fn poll_events(&mut self) -> Vec<TransportEvent>;

    /// Whether the handshake has completed and the connection is still up.
    fn is_open(&self) -> bool;
}

// ============================================================================
// Native WebSocket Client
// ============================================================================

mod native_client {
    use super::*;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tungstenite::client::IntoClientRequest;
    use tungstenite::http::HeaderValue;
    use tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
    use tungstenite::{Message, connect};
    use url::Url;

    /// First hundred characters of a frame, for logging.
    fn preview(text: &str) -> &str {
        let end = text.char_indices().nth(100).map_or(text.len(), |(i, _)| i);
        &text[..end]
    }

    /// Hand frames that were queued but never written back to the owner.
    fn return_unsent(cmd_rx: &Receiver<WsCommand>, event_tx: &Sender<TransportEvent>) {
        while let Ok(command) = cmd_rx.try_recv() {
            if let WsCommand::Send(msg) = command {
                let _ = event_tx.send(TransportEvent::SendFailed(msg));
            }
        }
    }

    /// Commands sent to the WebSocket thread.
    enum WsCommand {
        Send(String),
        Close,
    }

    /// WebSocket client backed by a background thread.
    pub struct NativeWebSocket {
        open: bool,
        events: Vec<TransportEvent>,
        /// Channel to send commands to the WebSocket thread.
        cmd_tx: Option<Sender<WsCommand>>,
        /// Channel to receive events from the WebSocket thread.
        event_rx: Option<Receiver<TransportEvent>>,
        _thread: Option<JoinHandle<()>>,
    }

    impl NativeWebSocket {
        pub fn new() -> Self {
            Self {
                open: false,
                events: Vec::new(),
                cmd_tx: None,
                event_rx: None,
                _thread: None,
            }
        }

        fn build_request(
            request: &ConnectRequest,
        ) -> Result<tungstenite::handshake::client::Request, TransportError> {
            let parsed = Url::parse(&request.url)
                .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", request.url, e)))?;
            if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme: {}",
                    parsed.scheme()
                )));
            }

            let mut http_request = request
                .url
                .as_str()
                .into_client_request()
                .map_err(|e| TransportError::Handshake(e.to_string()))?;
            let headers = http_request.headers_mut();
            if let Some(token) = &request.token {
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| TransportError::Handshake(e.to_string()))?;
                headers.insert(AUTHORIZATION, value);
            }
            let protocol = HeaderValue::from_str(&request.protocol)
                .map_err(|e| TransportError::Handshake(e.to_string()))?;
            headers.insert(SEC_WEBSOCKET_PROTOCOL, protocol);
            Ok(http_request)
        }
    }

    impl Transport for NativeWebSocket {
        fn connect(&mut self, request: &ConnectRequest) -> Result<(), TransportError> {
            if self.cmd_tx.is_some() {
                return Err(TransportError::AlreadyConnected);
            }
            let http_request = Self::build_request(request)?;

            let (cmd_tx, cmd_rx) = channel::<WsCommand>();
            let (event_tx, event_rx) = channel::<TransportEvent>();

            let handle = thread::spawn(move || {
                log::info!("WebSocket thread: connecting to {}", http_request.uri().path());

                let (mut socket, response) = match connect(http_request) {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::error!("WebSocket connection failed: {}", e);
                        let _ = event_tx.send(TransportEvent::Error(format!(
                            "connection failed: {}",
                            e
                        )));
                        return;
                    }
                };
                log::info!("WebSocket connected, status: {}", response.status());
                let _ = event_tx.send(TransportEvent::Connected);

                // A short read timeout keeps the loop responsive to outgoing commands.
                match socket.get_mut() {
                    tungstenite::stream::MaybeTlsStream::Plain(tcp) => {
                        let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
                        let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
                    }
                    #[allow(unreachable_patterns)]
                    _ => {
                        log::debug!("TLS or other stream - using default timeout handling");
                    }
                }

                loop {
                    match cmd_rx.try_recv() {
                        Ok(WsCommand::Send(msg)) => {
                            log::debug!("WebSocket sending: {}", preview(&msg));
                            if let Err(e) = socket.send(Message::Text(msg.clone())) {
                                log::error!("WebSocket send error: {}", e);
                                let _ = event_tx.send(TransportEvent::SendFailed(msg));
                                return_unsent(&cmd_rx, &event_tx);
                                let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                                return;
                            }
                        }
                        Ok(WsCommand::Close) => {
                            log::info!("WebSocket close requested");
                            let _ = socket.close(None);
                            let _ = socket.flush();
                            break;
                        }
                        Err(TryRecvError::Disconnected) => {
                            log::info!("WebSocket command channel disconnected");
                            break;
                        }
                        Err(TryRecvError::Empty) => {}
                    }

                    match socket.read() {
                        Ok(Message::Text(txt)) => {
                            log::debug!("WebSocket received: {}", preview(&txt));
                            let _ = event_tx.send(TransportEvent::Text(txt));
                        }
                        Ok(Message::Ping(data)) => {
                            let _ = socket.send(Message::Pong(data));
                        }
                        Ok(Message::Close(_)) => {
                            log::info!("WebSocket received close frame");
                            break;
                        }
                        Ok(_) => {}
                        Err(tungstenite::Error::Io(ref e))
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(e) => {
                            log::error!("WebSocket read error: {}", e);
                            return_unsent(&cmd_rx, &event_tx);
                            let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                            return;
                        }
                    }
                }

                return_unsent(&cmd_rx, &event_tx);
                log::info!("WebSocket thread exiting");
                let _ = event_tx.send(TransportEvent::Closed);
            });

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);
            Ok(())
        }

        fn disconnect(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.event_rx = None;
            self._thread = None;
            self.events.clear();
            self.open = false;
        }

        fn send(&mut self, text: &str) -> Result<(), TransportError> {
            if !self.open {
                return Err(TransportError::NotConnected);
            }
            match self.cmd_tx {
                Some(ref tx) => tx
                    .send(WsCommand::Send(text.to_string()))
                    .map_err(|e| TransportError::Send(e.to_string())),
                None => Err(TransportError::NotConnected),
            }
        }

        fn poll_events(&mut self) -> Vec<TransportEvent> {
            let mut finished = false;
            if let Some(ref rx) = self.event_rx {
                while let Ok(event) = rx.try_recv() {
                    match &event {
                        TransportEvent::Connected => self.open = true,
                        TransportEvent::Closed | TransportEvent::Error(_) => {
                            self.open = false;
                            finished = true;
                        }
                        _ => {}
                    }
                    self.events.push(event);
                }
            }
            if finished {
                // The worker has exited; allow a fresh connect.
                self.cmd_tx = None;
                self.event_rx = None;
                self._thread = None;
            }
            std::mem::take(&mut self.events)
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.disconnect();
        }
    }

}

pub use native_client::NativeWebSocket;
