use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of the traffic a server turned away.
#[derive(Debug, Default)]
pub struct TableStats {
    stale_batches: AtomicU64,
    non_finite: AtomicU64,
    filtered: AtomicU64,
    deferred_pulls: AtomicU64,
}

/// A point in time copy of `TableStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub stale_batches: u64,
    pub non_finite: u64,
    pub filtered: u64,
    pub deferred_pulls: u64,
}

impl TableStats {
    pub fn stale_batch(&self) {
        self.stale_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn non_finite(&self, n: u64) {
        self.non_finite.fetch_add(n, Ordering::Relaxed);
    }

    pub fn filtered(&self, n: u64) {
        self.filtered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn deferred_pull(&self) {
        self.deferred_pulls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            stale_batches: self.stale_batches.load(Ordering::Relaxed),
            non_finite: self.non_finite.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            deferred_pulls: self.deferred_pulls.load(Ordering::Relaxed),
        }
    }
}
