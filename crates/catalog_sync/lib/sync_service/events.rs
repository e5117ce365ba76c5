use catalog_core::{CatalogItem, ScanPhase};
use serde::Serialize;

/// Capacity of the bounded scan → writer channel; full sends suspend the phase handler.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Snapshot of the per-phase discovery counters, indexed by `ScanPhase::index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PhaseCounts([u64; 4]);

impl PhaseCounts {
    pub(crate) fn from_slots(slots: [u64; 4]) -> Self {
        Self(slots)
    }

    pub fn get(&self, phase: ScanPhase) -> u64 {
        self.0[phase.index()]
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    pub(crate) fn add(&mut self, phase: ScanPhase, value: u64) {
        self.0[phase.index()] = self.0[phase.index()].saturating_add(value);
    }
}

/// Everything a phase handler tells the writer side.
///
/// Events of one phase arrive in the order they were sent; there is no ordering between phases,
/// so consumers key off the event's phase tag.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEvent {
    ItemDiscovered {
        phase: ScanPhase,
        item: CatalogItem,
    },
    ScanProgress {
        counts: PhaseCounts,
        current_phase: ScanPhase,
    },
    PhaseComplete {
        phase: ScanPhase,
        count: u64,
        duration_ms: u64,
    },
    Error {
        phase: ScanPhase,
        message: String,
    },
}

impl CatalogEvent {
    pub fn phase(&self) -> ScanPhase {
        match self {
            Self::ItemDiscovered { phase, .. }
            | Self::PhaseComplete { phase, .. }
            | Self::Error { phase, .. } => *phase,
            Self::ScanProgress { current_phase, .. } => *current_phase,
        }
    }
}

pub type EventSink = flume::Sender<CatalogEvent>;
pub type EventReceiver = flume::Receiver<CatalogEvent>;

pub fn event_channel(capacity: usize) -> (EventSink, EventReceiver) {
    flume::bounded(capacity.max(1))
}
