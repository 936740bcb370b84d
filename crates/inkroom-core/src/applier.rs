//! Remote operation applier.
//!
//! Paints operations received from other participants and records the
//! resulting frame. Operations this client originated are recognised by
//! [`EchoFilter`] and never painted a second time.

use std::collections::HashSet;
use uuid::Uuid;

use crate::codec::{self, CodecError, DrawMessage};
use crate::history::RasterHistory;
use crate::operation::{DrawOperation, OpKind};
use crate::surface::Surface;

/// Recognises this client's own operations on the broadcast channel.
///
/// Every operation sent by this client carries a fresh correlation id, which
/// the server echoes back. An inbound operation whose id was issued here is a
/// self-echo. Operations without an id fall back to comparing the origin user
/// with the local identity; an empty identity or origin never matches.
#[derive(Debug, Clone, Default)]
pub struct EchoFilter {
    local_identity: Option<String>,
    in_flight: HashSet<Uuid>,
}

impl EchoFilter {
    pub fn new(local_identity: Option<&str>) -> Self {
        Self {
            local_identity: local_identity
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            in_flight: HashSet::new(),
        }
    }

    /// Remember an id issued by this client.
    pub fn remember(&mut self, client_op_id: Uuid) {
        self.in_flight.insert(client_op_id);
    }

    pub fn forget(&mut self, client_op_id: Uuid) {
        self.in_flight.remove(&client_op_id);
    }

    /// Forget every remembered id.
    pub fn forget_all(&mut self) {
        self.in_flight.clear();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether an inbound operation is an echo of one of ours.
    ///
    /// A matching id is consumed: the server broadcasts each operation once.
    pub fn is_self_echo(&mut self, client_op_id: Option<Uuid>, origin_user: Option<&str>) -> bool {
        if let Some(id) = client_op_id {
            return self.in_flight.remove(&id);
        }
        match (self.local_identity.as_deref(), origin_user) {
            (Some(local), Some(origin)) => !origin.is_empty() && local == origin,
            _ => false,
        }
    }
}

/// Result of applying one inbound operation.
#[derive(Debug)]
pub enum ApplyOutcome {
    Applied(OpKind),
    /// The operation could not be decoded and was dropped.
    Skipped(CodecError),
}

/// Paint a decoded operation and record the resulting frame.
pub fn apply_operation<S: Surface>(
    operation: &DrawOperation,
    surface: &mut S,
    history: &mut RasterHistory<S::Frame>,
) {
    surface.paint(&operation.op);
    history.record(surface.capture());
}

/// Decode a wire message and apply it. Decode failures skip the message.
pub fn apply_message<S: Surface>(
    message: &DrawMessage,
    surface: &mut S,
    history: &mut RasterHistory<S::Frame>,
) -> ApplyOutcome {
    match codec::decode(message) {
        Ok(operation) => {
            log::debug!(
                "Applying remote {} from {:?} (seq {:?})",
                operation.kind(),
                operation.origin_user,
                operation.sequence
            );
            apply_operation(&operation, surface, history);
            ApplyOutcome::Applied(operation.kind())
        }
        Err(e) => {
            log::warn!("Skipping operation for room {}: {}", message.room_id, e);
            ApplyOutcome::Skipped(e)
        }
    }
}
