use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of [`DispatchStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchCounts {
    pub accepted: u64,
    pub completed: u64,
    pub handler_errors: u64,
    pub crashed: u64,
    pub rejected_full: u64,
    pub rejected_stopped: u64,
}

impl DispatchCounts {
    /// Accepted requests whose response has not been produced yet.
    pub fn in_flight(&self) -> u64 {
        self.accepted
            .saturating_sub(self.completed + self.handler_errors + self.crashed)
    }
}

/// Counters shared by the dispatcher and its shard workers.
///
/// Counts survive `stop` / `start` cycles: they describe the dispatcher's
/// whole lifetime, not one run.
#[derive(Debug, Default)]
pub struct DispatchStats {
    accepted: AtomicU64,
    completed: AtomicU64,
    handler_errors: AtomicU64,
    crashed: AtomicU64,
    rejected_full: AtomicU64,
    rejected_stopped: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_crash(&self) {
        self.crashed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected_full(&self) {
        self.rejected_full.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected_stopped(&self) {
        self.rejected_stopped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchCounts {
        DispatchCounts {
            accepted: self.accepted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            crashed: self.crashed.load(Ordering::Relaxed),
            rejected_full: self.rejected_full.load(Ordering::Relaxed),
            rejected_stopped: self.rejected_stopped.load(Ordering::Relaxed),
        }
    }
}
