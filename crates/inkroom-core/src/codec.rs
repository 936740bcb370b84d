//! Operation codec.
//!
//! On the wire a draw operation is a flat record with a `type` discriminator
//! and a `data` field holding the payload as an independently encoded JSON
//! string. Decoding resolves the discriminator into an [`OpKind`] and parses
//! the payload into the matching typed shape.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::operation::{DrawOp, DrawOperation, OpKind};

/// Prefix of the data URL used for persisted baselines.
pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown operation kind: {0}")]
    UnknownKind(String),
    #[error("malformed {kind} payload: {source}")]
    Malformed {
        kind: OpKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid frame: {0}")]
    Frame(#[from] serde_json::Error),
    #[error("invalid baseline image: {0}")]
    Baseline(String),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Wire form of a draw operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawMessage {
    pub room_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_op_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

/// An operation as returned by the room history endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOperation {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
    pub sequence: u64,
    /// Id the submitting client stamped on the operation, when it sent one.
    #[serde(
        default,
        rename = "clientOpId",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_op_id: Option<Uuid>,
}

/// Encode only the payload of an operation.
pub fn encode_payload(op: &DrawOp) -> CodecResult<String> {
    let data = match op {
        DrawOp::Pen(stroke) | DrawOp::Eraser(stroke) => serde_json::to_string(stroke)?,
        DrawOp::Rectangle(rect) => serde_json::to_string(rect)?,
        DrawOp::Circle(circle) => serde_json::to_string(circle)?,
        DrawOp::Line(line) => serde_json::to_string(line)?,
        DrawOp::Text(label) => serde_json::to_string(label)?,
        DrawOp::Clear => "{}".to_string(),
    };
    Ok(data)
}

/// Decode a payload given its wire discriminator.
pub fn decode_payload(kind: &str, data: &str) -> CodecResult<DrawOp> {
    let kind = OpKind::parse(kind).ok_or_else(|| CodecError::UnknownKind(kind.to_string()))?;
    let malformed = |source| CodecError::Malformed { kind, source };
    let op = match kind {
        OpKind::Pen => DrawOp::Pen(serde_json::from_str(data).map_err(malformed)?),
        OpKind::Eraser => DrawOp::Eraser(serde_json::from_str(data).map_err(malformed)?),
        OpKind::Rectangle => DrawOp::Rectangle(serde_json::from_str(data).map_err(malformed)?),
        OpKind::Circle => DrawOp::Circle(serde_json::from_str(data).map_err(malformed)?),
        OpKind::Line => DrawOp::Line(serde_json::from_str(data).map_err(malformed)?),
        OpKind::Text => DrawOp::Text(serde_json::from_str(data).map_err(malformed)?),
        // Clear carries no geometry; whatever is in `data` is irrelevant.
        OpKind::Clear => DrawOp::Clear,
    };
    Ok(op)
}

/// Encode an operation into its wire form.
pub fn encode(operation: &DrawOperation) -> CodecResult<DrawMessage> {
    Ok(DrawMessage {
        room_id: operation.room_id.clone(),
        kind: operation.kind().as_str().to_string(),
        data: encode_payload(&operation.op)?,
        username: operation.origin_user.clone(),
        client_op_id: operation.client_op_id,
        sequence: operation.sequence,
    })
}

/// Decode a wire message into a typed operation.
pub fn decode(message: &DrawMessage) -> CodecResult<DrawOperation> {
    Ok(DrawOperation {
        op: decode_payload(&message.kind, &message.data)?,
        origin_user: message.username.clone(),
        room_id: message.room_id.clone(),
        client_op_id: message.client_op_id,
        sequence: message.sequence,
    })
}

/// Decode a stored history entry belonging to `room_id`.
pub fn decode_stored(room_id: &str, stored: &StoredOperation) -> CodecResult<DrawOperation> {
    Ok(DrawOperation {
        op: decode_payload(&stored.kind, &stored.data)?,
        origin_user: None,
        room_id: room_id.to_string(),
        client_op_id: stored.client_op_id,
        sequence: Some(stored.sequence),
    })
}

/// Wrap PNG bytes into a data URL.
pub fn encode_data_url(png: &[u8]) -> String {
    format!("{}{}", PNG_DATA_URL_PREFIX, STANDARD.encode(png))
}

/// Extract the image bytes of a data URL. A bare base64 string is accepted too.
pub fn decode_data_url(url: &str) -> CodecResult<Vec<u8>> {
    let encoded = match url.split_once(";base64,") {
        Some((header, body)) if header.starts_with("data:") => body,
        Some(_) => return Err(CodecError::Baseline("unsupported data URL".to_string())),
        None => url,
    };
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| CodecError::Baseline(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{RectShape, Stroke};
    use kurbo::Point;

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

    #[test]
    fn test_encode_uses_wire_names() {
        let op = DrawOperation::local("room-1", Some("alice"), rectangle());
        let message = encode(&op).unwrap();
        assert_eq!(message.kind, "rectangle");
        assert_eq!(message.room_id, "room-1");
        assert!(message.data.contains("\"lineWidth\":2"));

        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"type\":\"rectangle\""));
        assert!(json.contains("\"roomId\":\"room-1\""));
        assert!(json.contains("\"clientOpId\""));
        assert!(!json.contains("sequence"));
    }

    #[test]
    fn test_decode_rectangle_from_wire() {
        let json = r##"{"roomId":"r","type":"rectangle","data":"{\"x\":10,\"y\":10,\"width\":50,\"height\":30,\"color\":\"#FF0000\",\"lineWidth\":2}","username":"bob","sequence":7}"##;
        let message: DrawMessage = serde_json::from_str(json).unwrap();
        let op = decode(&message).unwrap();
        assert_eq!(op.op, rectangle());
        assert_eq!(op.origin_user.as_deref(), Some("bob"));
        assert_eq!(op.sequence, Some(7));
        assert_eq!(op.client_op_id, None);
    }

    #[test]
    fn test_unknown_kind_is_reported() {
        let err = decode_payload("spray", "{}").unwrap_err();
        assert!(matches!(err, CodecError::UnknownKind(ref k) if k == "spray"));
    }

    #[test]
    fn test_missing_geometry_is_malformed() {
        let err = decode_payload("circle", r#"{"x":1,"y":2}"#).unwrap_err();
        assert!(matches!(err, CodecError::Malformed { kind: OpKind::Circle, .. }));

        let err = decode_payload("pen", "not json").unwrap_err();
        assert!(matches!(err, CodecError::Malformed { kind: OpKind::Pen, .. }));
    }

    #[test]
    fn test_clear_ignores_data() {
        assert_eq!(decode_payload("clear", "").unwrap(), DrawOp::Clear);
        assert_eq!(encode_payload(&DrawOp::Clear).unwrap(), "{}");
    }

    #[test]
    fn test_eraser_points_decode() {
        let data = r#"{"points":[{"x":1,"y":2},{"x":3,"y":4}],"lineWidth":8}"#;
        match decode_payload("eraser", data).unwrap() {
            DrawOp::Eraser(Stroke { points, line_width, .. }) => {
                assert_eq!(points, vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);
                assert_eq!(line_width, 8.0);
            }
            other => panic!("unexpected op: {:?}", other),
        }
    }

    #[test]
    fn test_stored_operation_decodes_with_sequence() {
        let stored = StoredOperation {
            kind: "clear".to_string(),
            data: "{}".to_string(),
            sequence: 42,
            client_op_id: None,
        };
        let op = decode_stored("room", &stored).unwrap();
        assert_eq!(op.sequence, Some(42));
        assert_eq!(op.room_id, "room");
        assert_eq!(op.client_op_id, None);

        let id = Uuid::new_v4();
        let json = format!(r#"{{"type":"clear","data":"{{}}","sequence":7,"clientOpId":"{}"}}"#, id);
        let stored: StoredOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(decode_stored("room", &stored).unwrap().client_op_id, Some(id));
    }

    #[test]
    fn test_data_url() {
        let url = encode_data_url(&[1, 2, 3, 4]);
        assert!(url.starts_with(PNG_DATA_URL_PREFIX));
        assert_eq!(decode_data_url(&url).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(decode_data_url("AQIDBA==").unwrap(), vec![1, 2, 3, 4]);
        assert!(decode_data_url("data:image/png;base64,@@@").is_err());
    }
}
