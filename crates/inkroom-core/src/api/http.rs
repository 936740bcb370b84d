//! HTTP room API client.

use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::{
    ApiError, ApiResult, ChatRecord, CreateRoomRequest, CreatedRoom, RoomApi, RoomSummary,
    SaveResponse, SaveSnapshotRequest, SnapshotBody,
};
use crate::codec::StoredOperation;
use crate::config::ClientConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Pull a human readable message out of an error body.
fn error_message(body: &str, fallback: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "message"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }
    let body = body.trim();
    if body.is_empty() {
        fallback.to_string()
    } else {
        body.to_string()
    }
}

/// Room API client
pub struct HttpRoomApi {
    config: ClientConfig,
    client: Client,
}

impl HttpRoomApi {
    pub fn new(config: ClientConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to create client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn room_url(&self, room_id: &str, endpoint: &str) -> ApiResult<url::Url> {
        let mut url = url::Url::parse(&self.config.api_url("/api/rooms"))
            .map_err(|e| ApiError::Network(format!("invalid server URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Network("invalid server URL".to_string()))?
            .push(room_id)
            .push(endpoint);
        Ok(url)
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder, token: &str) -> ApiResult<T> {
        let response = request
            .bearer_auth(token)
            .send()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let fallback = status.canonical_reason().unwrap_or("request failed");
            let body = response.text().unwrap_or_default();
            let message = error_message(&body, fallback);
            log::warn!("API request failed: {} - {}", status, message);
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .map_err(|e| ApiError::Decode(format!("Failed to parse response: {}", e)))
    }
}

impl RoomApi for HttpRoomApi {
    fn create_room(&self, token: &str, name: &str) -> ApiResult<CreatedRoom> {
        let url = self.config.api_url("/api/rooms/create");
        let body = CreateRoomRequest {
            name: name.to_string(),
        };
        self.send(self.client.post(url).json(&body), token)
    }

    fn list_rooms(&self, token: &str) -> ApiResult<Vec<RoomSummary>> {
        let url = self.config.api_url("/api/rooms/list");
        self.send(self.client.get(url), token)
    }

    fn fetch_baseline(&self, token: &str, room_id: &str) -> ApiResult<SnapshotBody> {
        let url = self.room_url(room_id, "snapshot")?;
        self.send(self.client.get(url), token)
    }

    fn fetch_operations(
        &self,
        token: &str,
        room_id: &str,
        after_sequence: u64,
    ) -> ApiResult<Vec<StoredOperation>> {
        let mut url = self.room_url(room_id, "operations")?;
        url.query_pairs_mut()
            .append_pair("afterSequence", &after_sequence.to_string());
        self.send(self.client.get(url), token)
    }

    fn fetch_chat_history(&self, token: &str, room_id: &str) -> ApiResult<Vec<ChatRecord>> {
        let url = self.room_url(room_id, "messages")?;
        self.send(self.client.get(url), token)
    }

    fn save_baseline(
        &self,
        token: &str,
        room_id: &str,
        request: &SaveSnapshotRequest,
    ) -> ApiResult<SaveResponse> {
        let url = self.room_url(room_id, "save")?;
        self.send(self.client.post(url).json(request), token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_json_fields() {
        assert_eq!(error_message(r#"{"error":"Room not found"}"#, "x"), "Room not found");
        assert_eq!(error_message(r#"{"message":"nope"}"#, "x"), "nope");
        assert_eq!(error_message("plain text", "x"), "plain text");
        assert_eq!(error_message("  ", "Not Found"), "Not Found");
    }

    #[test]
    fn test_room_url_escapes_room_id() {
        let mut config = ClientConfig::default();
        config.server_url = "http://localhost:3030/".to_string();
        let api = HttpRoomApi::new(config).unwrap();
        let url = api.room_url("a/b c", "operations").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:3030/api/rooms/a%2Fb%20c/operations"
        );
    }
}
