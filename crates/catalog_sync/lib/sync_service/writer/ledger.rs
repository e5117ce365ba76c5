use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use catalog_core::ScanPhase;

/// Failed write kept in memory for the run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerFailure {
    pub phase: ScanPhase,
    pub provider_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerTotals {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct PhaseSlot {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// One entry per write attempt of a run: every attempted item ends up succeeded or failed.
#[derive(Debug, Default)]
pub struct IngestLedger {
    slots: [PhaseSlot; 4],
    failures: Mutex<Vec<LedgerFailure>>,
}

impl IngestLedger {
    pub fn record_success(&self, phase: ScanPhase) {
        let slot = &self.slots[phase.index()];
        slot.attempted.fetch_add(1, Ordering::Relaxed);
        slot.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, phase: ScanPhase, provider_id: &str, message: &str) {
        let slot = &self.slots[phase.index()];
        slot.attempted.fetch_add(1, Ordering::Relaxed);
        slot.failed.fetch_add(1, Ordering::Relaxed);
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LedgerFailure {
                phase,
                provider_id: provider_id.to_string(),
                message: message.to_string(),
            });
    }

    pub fn totals(&self, phase: ScanPhase) -> LedgerTotals {
        let slot = &self.slots[phase.index()];
        LedgerTotals {
            attempted: slot.attempted.load(Ordering::Relaxed),
            succeeded: slot.succeeded.load(Ordering::Relaxed),
            failed: slot.failed.load(Ordering::Relaxed),
        }
    }

    pub fn grand_totals(&self) -> LedgerTotals {
        ScanPhase::ALL
            .into_iter()
            .map(|phase| self.totals(phase))
            .fold(LedgerTotals::default(), |acc, totals| LedgerTotals {
                attempted: acc.attempted + totals.attempted,
                succeeded: acc.succeeded + totals.succeeded,
                failed: acc.failed + totals.failed,
            })
    }

    pub fn failures(&self) -> Vec<LedgerFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
