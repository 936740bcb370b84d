//! Room bootstrap sequencer.
//!
//! Rebuilds a room's surface when joining: the persisted baseline first, then
//! every stored operation after the baseline's watermark, in sequence order.
//! The two fetches run through the API dispatcher while the session connects;
//! live operations that arrive in the meantime are held back and applied once
//! the stored history has been replayed.
//!
//! Draws this client makes before the replay finishes are already on the
//! surface. Their stored copies are recognised by client id or by the
//! sequence their echo carried, and are not painted again.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::api::{ApiRequest, ApiResult, SnapshotBody};
use crate::applier::{self, ApplyOutcome};
use crate::codec::{self, DrawMessage, StoredOperation};
use crate::history::RasterHistory;
use crate::operation::DrawOp;
use crate::surface::Surface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    FetchingBaseline,
    FetchingOperations { watermark: u64 },
    Complete,
}

/// Summary of a finished bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Stored operations applied.
    pub replayed: usize,
    /// Stored or live operations that could not be decoded.
    pub skipped: usize,
    /// Buffered live operations applied after the replay.
    pub live_applied: usize,
    /// Stored operations this client had already painted itself.
    pub own: usize,
    /// Highest sequence now reflected on the surface.
    pub highest_sequence: Option<u64>,
}

/// Per-join reconstruction state.
#[derive(Debug)]
pub struct Bootstrap {
    room_id: String,
    phase: BootstrapPhase,
    /// Live operations received before the replay finished.
    buffered: Vec<DrawMessage>,
    /// Operations drawn locally before the baseline landed.
    local: Vec<(Option<Uuid>, DrawOp)>,
    /// Client ids of local draws made before completion.
    own_ids: HashSet<Uuid>,
    /// Sequences the server echoed back for those draws.
    own_sequences: HashSet<u64>,
    /// The same, keyed by client id when the echo carried one.
    echoed: HashMap<Uuid, u64>,
}

impl Bootstrap {
    pub fn new(room_id: &str) -> Self {
        Self {
            room_id: room_id.to_string(),
            phase: BootstrapPhase::FetchingBaseline,
            buffered: Vec::new(),
            local: Vec::new(),
            own_ids: HashSet::new(),
            own_sequences: HashSet::new(),
            echoed: HashMap::new(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn phase(&self) -> BootstrapPhase {
        self.phase
    }

    pub fn is_complete(&self) -> bool {
        self.phase == BootstrapPhase::Complete
    }

    /// The first request to issue.
    pub fn start(&self) -> ApiRequest {
        log::info!("Bootstrap {}: fetching baseline", self.room_id);
        ApiRequest::FetchBaseline {
            room_id: self.room_id.clone(),
        }
    }

    /// Hold a live operation until the replay is done.
    pub fn buffer_live(&mut self, message: DrawMessage) {
        self.buffered.push(message);
    }

    /// Remember a local draw made before completion. Ops drawn before the
    /// baseline arrived are kept to be repainted over it.
    pub fn note_local(&mut self, client_op_id: Option<Uuid>, op: DrawOp) {
        if self.is_complete() {
            return;
        }
        if let Some(id) = client_op_id {
            self.own_ids.insert(id);
        }
        if self.phase == BootstrapPhase::FetchingBaseline {
            self.local.push((client_op_id, op));
        }
    }

    /// Remember the sequence the server gave one of our own draws.
    pub fn note_own_echo(&mut self, client_op_id: Option<Uuid>, sequence: Option<u64>) {
        let Some(sequence) = sequence else {
            return;
        };
        if self.is_complete() {
            return;
        }
        self.own_sequences.insert(sequence);
        if let Some(id) = client_op_id {
            self.echoed.insert(id, sequence);
        }
    }

    fn is_own(&self, entry: &StoredOperation) -> bool {
        self.own_sequences.contains(&entry.sequence)
            || entry.client_op_id.is_some_and(|id| self.own_ids.contains(&id))
    }

    /// Paint the baseline (or nothing) as `history[0]` and ask for the
    /// operations after its watermark. Any failure degrades to a blank
    /// baseline with watermark 0.
    pub fn on_baseline<S: Surface>(
        &mut self,
        result: ApiResult<SnapshotBody>,
        surface: &mut S,
        history: &mut RasterHistory<S::Frame>,
    ) -> ApiRequest {
        surface.clear();
        let watermark = match result {
            Ok(snapshot) if snapshot.has_image() => {
                match codec::decode_data_url(&snapshot.image_data)
                    .map_err(|e| e.to_string())
                    .and_then(|png| surface.paint_baseline(&png).map_err(|e| e.to_string()))
                {
                    Ok(()) => {
                        let watermark = snapshot.sequence.unwrap_or(0);
                        log::info!("Bootstrap {}: baseline at sequence {}", self.room_id, watermark);
                        watermark
                    }
                    Err(e) => {
                        log::warn!("Bootstrap {}: unusable baseline, replaying all: {}", self.room_id, e);
                        surface.clear();
                        0
                    }
                }
            }
            Ok(_) => {
                log::info!("Bootstrap {}: no baseline", self.room_id);
                0
            }
            Err(e) => {
                log::warn!("Bootstrap {}: baseline fetch failed, replaying all: {}", self.room_id, e);
                0
            }
        };
        history.reset(surface.capture());

        for (client_op_id, op) in std::mem::take(&mut self.local) {
            let folded = client_op_id
                .and_then(|id| self.echoed.get(&id))
                .is_some_and(|&sequence| sequence <= watermark);
            if folded {
                log::debug!("Bootstrap {}: local {} already in baseline", self.room_id, op.kind());
                continue;
            }
            surface.paint(&op);
            history.record(surface.capture());
        }

        self.phase = BootstrapPhase::FetchingOperations { watermark };
        log::info!("Bootstrap {}: fetching operations after {}", self.room_id, watermark);
        ApiRequest::FetchOperations {
            room_id: self.room_id.clone(),
            after_sequence: watermark,
        }
    }

    /// Replay stored operations, then the buffered live ones.
    pub fn on_operations<S: Surface>(
        &mut self,
        result: ApiResult<Vec<StoredOperation>>,
        surface: &mut S,
        history: &mut RasterHistory<S::Frame>,
    ) -> BootstrapReport {
        let watermark = match self.phase {
            BootstrapPhase::FetchingOperations { watermark } => watermark,
            _ => 0,
        };
        let mut report = BootstrapReport {
            highest_sequence: (watermark > 0).then_some(watermark),
            ..BootstrapReport::default()
        };

        let mut stored = match result {
            Ok(stored) => stored,
            Err(e) => {
                log::warn!("Bootstrap {}: operation fetch failed: {}", self.room_id, e);
                Vec::new()
            }
        };
        stored.sort_by_key(|op| op.sequence);
        for entry in stored.iter().filter(|op| op.sequence > watermark) {
            report.highest_sequence = Some(entry.sequence);
            if self.is_own(entry) {
                log::debug!("Bootstrap {}: #{} is our own draw", self.room_id, entry.sequence);
                report.own += 1;
                continue;
            }
            match codec::decode_stored(&self.room_id, entry) {
                Ok(operation) => {
                    applier::apply_operation(&operation, surface, history);
                    report.replayed += 1;
                }
                Err(e) => {
                    log::warn!("Bootstrap {}: skipping #{}: {}", self.room_id, entry.sequence, e);
                    report.skipped += 1;
                }
            }
        }

        let replayed_through = report.highest_sequence.unwrap_or(0);
        for message in std::mem::take(&mut self.buffered) {
            if let Some(sequence) = message.sequence {
                if sequence <= replayed_through {
                    log::debug!("Bootstrap {}: #{} already replayed", self.room_id, sequence);
                    continue;
                }
                report.highest_sequence = report.highest_sequence.max(Some(sequence));
            }
            match applier::apply_message(&message, surface, history) {
                ApplyOutcome::Applied(_) => report.live_applied += 1,
                ApplyOutcome::Skipped(_) => report.skipped += 1,
            }
        }

        self.phase = BootstrapPhase::Complete;
        self.own_ids.clear();
        self.own_sequences.clear();
        self.echoed.clear();
        log::info!(
            "Bootstrap {}: complete ({} replayed, {} own, {} live, {} skipped)",
            self.room_id,
            report.replayed,
            report.own,
            report.live_applied,
            report.skipped
        );
        report
    }
}
