//! Outbound operations waiting for a joined connection.

use std::collections::VecDeque;
use std::fmt::Display;

use crate::operation::DrawOperation;

/// Outcome of one flush attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub requeued: usize,
}

/// FIFO buffer of locally generated operations.
///
/// The queue is unbounded. A flush offers every element once, in order; the
/// elements whose send failed go back to the queue in their original order.
#[derive(Debug, Clone)]
pub struct PendingQueue<T = DrawOperation> {
    items: VecDeque<T>,
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, item: T) {
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Offer every queued element to `send`, re-queueing the failures.
    pub fn flush<E, S>(&mut self, mut send: S) -> FlushReport
    where
        E: Display,
        S: FnMut(&T) -> Result<(), E>,
    {
        let batch = std::mem::take(&mut self.items);
        let mut report = FlushReport::default();
        let mut failed = Vec::new();
        for item in batch {
            match send(&item) {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    log::warn!("Pending flush: send failed, keeping operation: {}", e);
                    failed.push(item);
                }
            }
        }
        report.requeued = failed.len();
        self.items.extend(failed);
        if report.sent > 0 || report.requeued > 0 {
            log::info!(
                "Pending flush: {} sent, {} requeued",
                report.sent,
                report.requeued
            );
        }
        report
    }

    /// Discard everything without sending. Returns how many were dropped.
    pub fn drain_on_leave(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        if dropped > 0 {
            log::info!("Dropped {} unsent operation(s) on leave", dropped);
        }
        dropped
    }
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
