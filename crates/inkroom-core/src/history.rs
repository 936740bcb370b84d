//! Raster undo/redo history.
//!
//! Every entry is a full frame rather than a diff, so memory grows linearly
//! with the number of edits in a room. The history is reset on every join,
//! which bounds its lifetime to one room membership.

/// Linear history of captured frames with a cursor.
///
/// `entries[0]` is always the frame the room started from (blank or the
/// loaded baseline) and `cursor` always indexes an existing entry.
#[derive(Debug, Clone)]
pub struct RasterHistory<F> {
    entries: Vec<F>,
    cursor: usize,
}

impl<F> RasterHistory<F> {
    /// Create a history whose only entry is `baseline`.
    pub fn new(baseline: F) -> Self {
        Self {
            entries: vec![baseline],
            cursor: 0,
        }
    }

    /// Append a frame, discarding every entry after the cursor.
    pub fn record(&mut self, frame: F) {
        self.entries.truncate(self.cursor + 1);
        self.entries.push(frame);
        self.cursor = self.entries.len() - 1;
        log::debug!("History: recorded entry {}", self.cursor);
    }

    /// Step back one entry. Returns the frame to display, or `None` at the start.
    pub fn undo(&mut self) -> Option<&F> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor)
    }

    /// Step forward one entry. Returns the frame to display, or `None` at the tail.
    pub fn redo(&mut self) -> Option<&F> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor)
    }

    /// Drop every entry and start over from `baseline`.
    pub fn reset(&mut self, baseline: F) {
        self.entries.clear();
        self.entries.push(baseline);
        self.cursor = 0;
    }

    /// Replace the first entry, keeping everything recorded after it.
    pub fn rebase(&mut self, baseline: F) {
        if let Some(first) = self.entries.first_mut() {
            *first = baseline;
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    /// The frame at the cursor.
    pub fn current(&self) -> Option<&F> {
        self.entries.get(self.cursor)
    }
}
