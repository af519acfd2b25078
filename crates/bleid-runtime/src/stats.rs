//! Coordinator counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Snapshot of coordinator activity since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub operations_completed: u64,
    pub operations_failed: u64,
    pub operations_cancelled: u64,
    pub rotations: u64,
    /// Radio operations left disabled after a successful update
    pub resume_failures: u64,
    /// Radio operations left disabled while rolling back a failed operation
    pub rollback_failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
    pub rotations: AtomicU64,
    pub resume_failures: AtomicU64,
    pub rollback_failures: AtomicU64,
}

impl StatsCounters {
    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            operations_completed: self.completed.load(Ordering::Relaxed),
            operations_failed: self.failed.load(Ordering::Relaxed),
            operations_cancelled: self.cancelled.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            resume_failures: self.resume_failures.load(Ordering::Relaxed),
            rollback_failures: self.rollback_failures.load(Ordering::Relaxed),
        }
    }
}
