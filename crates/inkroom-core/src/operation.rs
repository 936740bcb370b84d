//! Drawing operations exchanged between room participants.
//!
//! An operation is one discrete drawing action. Each kind carries its own
//! typed payload so that a malformed payload is rejected when it is decoded
//! rather than when it is painted.

use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stroke color used when a payload does not specify one.
pub const DEFAULT_COLOR: &str = "#000000";
/// Stroke width used when a payload does not specify one.
pub const DEFAULT_LINE_WIDTH: f64 = 2.0;
/// Font size used when a text payload does not specify one.
pub const DEFAULT_FONT_SIZE: f64 = 16.0;

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

fn default_line_width() -> f64 {
    DEFAULT_LINE_WIDTH
}

fn default_font_size() -> f64 {
    DEFAULT_FONT_SIZE
}

/// A freehand path, used by both the pen and the eraser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    pub points: Vec<Point>,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_line_width")]
    pub line_width: f64,
}

/// An axis-aligned rectangle outline. Width and height may be negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RectShape {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_line_width")]
    pub line_width: f64,
}

/// A circle outline centered on `(x, y)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircleShape {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_line_width")]
    pub line_width: f64,
}

/// A straight segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineShape {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_line_width")]
    pub line_width: f64,
}

/// A text label anchored at its baseline origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextLabel {
    pub x: f64,
    pub y: f64,
    pub text: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_font_size")]
    pub font_size: f64,
}

/// Discriminator of a drawing operation, as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Pen,
    Eraser,
    Rectangle,
    Circle,
    Line,
    Text,
    Clear,
}

impl OpKind {
    pub const ALL: [OpKind; 7] = [
        OpKind::Pen,
        OpKind::Eraser,
        OpKind::Rectangle,
        OpKind::Circle,
        OpKind::Line,
        OpKind::Text,
        OpKind::Clear,
    ];

    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Pen => "pen",
            OpKind::Eraser => "eraser",
            OpKind::Rectangle => "rectangle",
            OpKind::Circle => "circle",
            OpKind::Line => "line",
            OpKind::Text => "text",
            OpKind::Clear => "clear",
        }
    }

    /// Parse a wire name. Returns `None` for kinds this client does not know.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A drawing action together with its geometry and style.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Pen(Stroke),
    Eraser(Stroke),
    Rectangle(RectShape),
    Circle(CircleShape),
    Line(LineShape),
    Text(TextLabel),
    Clear,
}

impl DrawOp {
    pub fn kind(&self) -> OpKind {
        match self {
            DrawOp::Pen(_) => OpKind::Pen,
            DrawOp::Eraser(_) => OpKind::Eraser,
            DrawOp::Rectangle(_) => OpKind::Rectangle,
            DrawOp::Circle(_) => OpKind::Circle,
            DrawOp::Line(_) => OpKind::Line,
            DrawOp::Text(_) => OpKind::Text,
            DrawOp::Clear => OpKind::Clear,
        }
    }
}

/// A drawing operation addressed to a room.
///
/// Operations are immutable once created. `client_op_id` is generated by the
/// originating client and echoed back by the server; it is what lets the
/// originator recognise its own operation on the broadcast channel.
/// `sequence` is assigned by the server when the operation is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawOperation {
    pub op: DrawOp,
    pub origin_user: Option<String>,
    pub room_id: String,
    pub client_op_id: Option<Uuid>,
    pub sequence: Option<u64>,
}

impl DrawOperation {
    /// Create an operation originating from this client.
    pub fn local(room_id: &str, origin_user: Option<&str>, op: DrawOp) -> Self {
        Self {
            op,
            origin_user: origin_user.map(str::to_string),
            room_id: room_id.to_string(),
            client_op_id: Some(Uuid::new_v4()),
            sequence: None,
        }
    }

    pub fn kind(&self) -> OpKind {
        self.op.kind()
    }
}
