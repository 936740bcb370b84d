//! Drawing surface abstraction.
//!
//! The synchronization core never rasterizes anything itself. It hands typed
//! operations to a [`Surface`] and captures whole frames from it for the
//! undo history.

use thiserror::Error;

use crate::operation::DrawOp;

/// Surface errors.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("image encode failed: {0}")]
    Encode(String),
}

/// A raster target for drawing operations.
pub trait Surface {
    /// A full copy of the visible raster.
    type Frame: Clone;

    /// Rasterize one operation onto the surface.
    fn paint(&mut self, op: &DrawOp);

    /// Reset every pixel to transparent.
    fn clear(&mut self);

    /// Capture the current raster.
    fn capture(&self) -> Self::Frame;

    /// Replace the current raster with a previously captured one.
    fn restore(&mut self, frame: &Self::Frame);

    /// Replace the current raster with an encoded image (PNG).
    fn paint_baseline(&mut self, encoded: &[u8]) -> Result<(), SurfaceError>;

    /// Encode the current raster as PNG.
    fn encode_png(&self) -> Result<Vec<u8>, SurfaceError>;
}
