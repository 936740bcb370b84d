//! Reference pixel surface.
//!
//! A small software rasterizer over an RGBA buffer. Strokes are drawn by
//! stamping a round brush along each segment; the eraser stamps transparent
//! pixels. Text is drawn as solid glyph blocks, one per non-blank character,
//! since font shaping belongs to the embedding UI.

use image::{ImageFormat, Rgba, RgbaImage};
use kurbo::Point;
use std::f64::consts::TAU;
use std::io::Cursor;

use crate::operation::{CircleShape, DrawOp, LineShape, RectShape, Stroke, TextLabel};
use crate::surface::{Surface, SurfaceError};

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Smallest brush radius; anything thinner would miss pixel centers.
const MIN_BRUSH_RADIUS: f64 = 0.75;
const MAX_BRUSH_RADIUS: f64 = 256.0;
/// Brush stamps per pixel of segment length.
const STAMPS_PER_PIXEL: f64 = 2.0;
const MAX_SEGMENT_STAMPS: usize = 16_384;

/// Parse a CSS-style color: `#rgb`, `#rrggbb`, `#rrggbbaa` or a basic name.
pub fn parse_color(value: &str) -> Option<Rgba<u8>> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix('#') {
        if !hex.is_ascii() {
            return None;
        }
        let byte = |s: &str| u8::from_str_radix(s, 16).ok();
        return match hex.len() {
            3 => Some(Rgba([
                byte(&hex[0..1])? * 17,
                byte(&hex[1..2])? * 17,
                byte(&hex[2..3])? * 17,
                255,
            ])),
            6 => Some(Rgba([byte(&hex[0..2])?, byte(&hex[2..4])?, byte(&hex[4..6])?, 255])),
            8 => Some(Rgba([
                byte(&hex[0..2])?,
                byte(&hex[2..4])?,
                byte(&hex[4..6])?,
                byte(&hex[6..8])?,
            ])),
            _ => None,
        };
    }
    let rgba = match value.to_ascii_lowercase().as_str() {
        "black" => [0, 0, 0, 255],
        "white" => [255, 255, 255, 255],
        "red" => [255, 0, 0, 255],
        "green" => [0, 128, 0, 255],
        "blue" => [0, 0, 255, 255],
        "yellow" => [255, 255, 0, 255],
        "transparent" => [0, 0, 0, 0],
        _ => return None,
    };
    Some(Rgba(rgba))
}

fn resolve_color(value: &str) -> Rgba<u8> {
    parse_color(value).unwrap_or_else(|| {
        log::debug!("Unrecognised color {:?}, using black", value);
        BLACK
    })
}

fn is_finite(point: Point) -> bool {
    point.x.is_finite() && point.y.is_finite()
}

/// An in-memory RGBA raster.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelSurface {
    image: RgbaImage,
}

impl PixelSurface {
    /// Create a fully transparent surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, TRANSPARENT),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// RGBA value at `(x, y)`, or `None` outside the surface.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.image.get_pixel_checked(x, y).map(|p| p.0)
    }

    /// Whether every pixel is transparent.
    pub fn is_blank(&self) -> bool {
        self.image.pixels().all(|p| p.0[3] == 0)
    }

    fn fill_box(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, color: Rgba<u8>) {
        let (width, height) = (self.image.width() as f64, self.image.height() as f64);
        let left = x0.min(x1).max(0.0).floor() as u32;
        let top = y0.min(y1).max(0.0).floor() as u32;
        let right = x0.max(x1).min(width).ceil() as u32;
        let bottom = y0.max(y1).min(height).ceil() as u32;
        for y in top..bottom {
            for x in left..right {
                self.image.put_pixel(x, y, color);
            }
        }
    }

    fn stamp(&mut self, center: Point, radius: f64, color: Rgba<u8>) {
        let r = radius.clamp(MIN_BRUSH_RADIUS, MAX_BRUSH_RADIUS);
        let (width, height) = (self.image.width() as f64, self.image.height() as f64);
        let left = (center.x - r).floor().max(0.0);
        let top = (center.y - r).floor().max(0.0);
        let right = (center.x + r).ceil().min(width);
        let bottom = (center.y + r).ceil().min(height);
        if left >= right || top >= bottom {
            return;
        }
        for y in top as u32..bottom as u32 {
            for x in left as u32..right as u32 {
                let dx = x as f64 + 0.5 - center.x;
                let dy = y as f64 + 0.5 - center.y;
                if dx * dx + dy * dy <= r * r {
                    self.image.put_pixel(x, y, color);
                }
            }
        }
    }

    fn segment(&mut self, from: Point, to: Point, line_width: f64, color: Rgba<u8>) {
        if !is_finite(from) || !is_finite(to) {
            return;
        }
        let stamps = ((from.distance(to) * STAMPS_PER_PIXEL).ceil() as usize)
            .clamp(1, MAX_SEGMENT_STAMPS);
        for i in 0..=stamps {
            let t = i as f64 / stamps as f64;
            self.stamp(from.lerp(to, t), line_width / 2.0, color);
        }
    }

    fn polyline(&mut self, points: &[Point], closed: bool, line_width: f64, color: Rgba<u8>) {
        for pair in points.windows(2) {
            self.segment(pair[0], pair[1], line_width, color);
        }
        if closed && points.len() > 2 {
            self.segment(points[points.len() - 1], points[0], line_width, color);
        }
    }

    fn stroke(&mut self, stroke: &Stroke, erase: bool) {
        if stroke.points.len() < 2 {
            log::warn!("Ignoring stroke with {} point(s)", stroke.points.len());
            return;
        }
        let color = if erase {
            TRANSPARENT
        } else {
            resolve_color(&stroke.color)
        };
        self.polyline(&stroke.points, false, stroke.line_width, color);
    }

    fn rectangle(&mut self, rect: &RectShape) {
        let corners = [
            Point::new(rect.x, rect.y),
            Point::new(rect.x + rect.width, rect.y),
            Point::new(rect.x + rect.width, rect.y + rect.height),
            Point::new(rect.x, rect.y + rect.height),
        ];
        self.polyline(&corners, true, rect.line_width, resolve_color(&rect.color));
    }

    fn circle(&mut self, circle: &CircleShape) {
        if !(circle.radius >= 0.0) || !circle.radius.is_finite() {
            log::warn!("Ignoring circle with radius {}", circle.radius);
            return;
        }
        let segments = ((circle.radius * TAU / 2.0).ceil() as usize).clamp(16, 4096);
        let points: Vec<Point> = (0..segments)
            .map(|i| {
                let angle = TAU * i as f64 / segments as f64;
                Point::new(
                    circle.x + circle.radius * angle.cos(),
                    circle.y + circle.radius * angle.sin(),
                )
            })
            .collect();
        self.polyline(&points, true, circle.line_width, resolve_color(&circle.color));
    }

    fn line(&mut self, line: &LineShape) {
        self.segment(
            Point::new(line.x1, line.y1),
            Point::new(line.x2, line.y2),
            line.line_width,
            resolve_color(&line.color),
        );
    }

    fn text(&mut self, label: &TextLabel) {
        if !label.x.is_finite() || !label.y.is_finite() || !(label.font_size > 0.0) {
            return;
        }
        let color = resolve_color(&label.color);
        let size = label.font_size.min(MAX_BRUSH_RADIUS * 2.0);
        let advance = size * 0.6;
        let glyph_width = size * 0.5;
        let glyph_height = size * 0.7;
        for (i, ch) in label.text.chars().enumerate() {
            if ch.is_whitespace() {
                continue;
            }
            let left = label.x + advance * i as f64;
            self.fill_box(left, label.y - glyph_height, left + glyph_width, label.y, color);
        }
    }
}

impl Surface for PixelSurface {
    type Frame = RgbaImage;

    fn paint(&mut self, op: &DrawOp) {
        match op {
            DrawOp::Pen(stroke) => self.stroke(stroke, false),
            DrawOp::Eraser(stroke) => self.stroke(stroke, true),
            DrawOp::Rectangle(rect) => self.rectangle(rect),
            DrawOp::Circle(circle) => self.circle(circle),
            DrawOp::Line(line) => self.line(line),
            DrawOp::Text(label) => self.text(label),
            DrawOp::Clear => self.clear(),
        }
    }

    fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = TRANSPARENT;
        }
    }

    fn capture(&self) -> RgbaImage {
        self.image.clone()
    }

    fn restore(&mut self, frame: &RgbaImage) {
        self.image.clone_from(frame);
    }

    fn paint_baseline(&mut self, encoded: &[u8]) -> Result<(), SurfaceError> {
        let decoded = image::load_from_memory(encoded)
            .map_err(|e| SurfaceError::Decode(e.to_string()))?
            .to_rgba8();
        self.clear();
        image::imageops::replace(&mut self.image, &decoded, 0, 0);
        Ok(())
    }

    fn encode_png(&self) -> Result<Vec<u8>, SurfaceError> {
        let mut bytes = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| SurfaceError::Encode(e.to_string()))?;
        Ok(bytes)
    }
}
