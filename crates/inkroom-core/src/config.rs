//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::protocol::PROTOCOL;
use crate::transport::{ConnectRequest, TransportError};

/// Default server URL
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3030";

/// Connection and surface settings shared by the REST client and the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base HTTP URL of the server.
    pub server_url: String,
    /// Path of the WebSocket endpoint.
    pub ws_path: String,
    /// Sub-protocol offered on the WebSocket handshake.
    pub protocol: String,
    /// Constant delay between reconnect attempts.
    pub retry_delay_ms: u64,
    pub surface_width: u32,
    pub surface_height: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            ws_path: "/ws".to_string(),
            protocol: PROTOCOL.to_string(),
            retry_delay_ms: 2000,
            surface_width: 1280,
            surface_height: 720,
        }
    }
}

fn parse_size(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.trim().split_once(['x', 'X'])?;
    let w = w.trim().parse().ok()?;
    let h = h.trim().parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

impl ClientConfig {
    /// Defaults overlaid with `INKROOM_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Overlay settings looked up through `get`. Unparseable values are ignored.
    pub fn apply_env<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = get("INKROOM_SERVER_URL").filter(|v| !v.trim().is_empty()) {
            self.server_url = url.trim().to_string();
        }
        if let Some(delay) = get("INKROOM_RETRY_DELAY_MS") {
            match delay.trim().parse() {
                Ok(ms) => self.retry_delay_ms = ms,
                Err(_) => log::warn!("Ignoring invalid INKROOM_RETRY_DELAY_MS: {:?}", delay),
            }
        }
        if let Some(size) = get("INKROOM_SURFACE_SIZE") {
            match parse_size(&size) {
                Some((w, h)) => {
                    self.surface_width = w;
                    self.surface_height = h;
                }
                None => log::warn!("Ignoring invalid INKROOM_SURFACE_SIZE: {:?}", size),
            }
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Get the full URL for an API endpoint
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.server_url.trim_end_matches('/'), path)
    }

    /// WebSocket URL carrying `token` as a query parameter.
    pub fn ws_url(&self, token: Option<&str>) -> Result<String, TransportError> {
        let mut url = Url::parse(&self.server_url)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", self.server_url, e)))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme: {}",
                    other
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| TransportError::InvalidUrl(self.server_url.clone()))?;
        url.set_path(&self.ws_path);
        url.set_query(None);
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url.into())
    }

    /// Everything the transport needs to open the room channel.
    pub fn connect_request(&self, token: Option<&str>) -> Result<ConnectRequest, TransportError> {
        Ok(ConnectRequest {
            url: self.ws_url(token)?,
            token: token.map(str::to_string),
            protocol: self.protocol.clone(),
        })
    }
}
