use std::collections::HashMap;

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Progress {
    last_epoch: u64,
    /// The newest epoch each worker pushed.
    workers: HashMap<usize, u64>,
}

/// Bounds how far apart the workers' epochs may drift.
///
/// Pushes trailing the newest epoch by more than the threshold are dropped,
/// pulls running ahead while some worker lags that much are deferred.
#[derive(Debug)]
pub struct StalenessGate {
    threshold: u64,
    progress: Mutex<Progress>,
}

impl StalenessGate {
    /// Creates a new `StalenessGate`.
    ///
    /// # Arguments
    /// * `threshold` - The largest tolerated epoch distance.
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            progress: Mutex::default(),
        }
    }

    /// Records a push and decides whether it should be applied.
    ///
    /// # Returns
    /// `false` if the batch is too stale.
    pub fn admit_push(&self, worker: usize, epoch: u64) -> bool {
        let mut progress = self.progress.lock();

        progress.last_epoch = progress.last_epoch.max(epoch);
        let newest = progress.workers.entry(worker).or_default();
        *newest = (*newest).max(epoch);

        progress.last_epoch - epoch <= self.threshold
    }

    /// Whether a pull at `epoch` has to wait for the slowest worker.
    pub fn defer_pull(&self, epoch: u64) -> bool {
        let progress = self.progress.lock();
        if epoch <= progress.last_epoch {
            return false;
        }

        let slowest = progress.workers.values().min().copied();
        slowest.is_some_and(|slowest| progress.last_epoch - slowest > self.threshold)
    }

    /// The newest epoch pushed so far.
    pub fn last_epoch(&self) -> u64 {
        self.progress.lock().last_epoch
    }

    /// How many epochs the slowest worker trails the newest one.
    pub fn lag(&self) -> u64 {
        let progress = self.progress.lock();
        let slowest = progress.workers.values().min().copied();
        slowest.map_or(0, |slowest| progress.last_epoch - slowest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_push_is_rejected() {
        let gate = StalenessGate::new(10);
        assert!(gate.admit_push(0, 100));
        assert!(gate.admit_push(1, 90));
        assert!(!gate.admit_push(1, 89));
        assert_eq!(gate.last_epoch(), 100);
    }

    #[test]
    fn test_pull_ahead_waits_for_laggard() {
        let gate = StalenessGate::new(2);
        gate.admit_push(0, 1);
        gate.admit_push(1, 4);

        assert_eq!(gate.lag(), 3);
        assert!(gate.defer_pull(5));
        assert!(!gate.defer_pull(4));

        gate.admit_push(0, 3);
        assert!(!gate.defer_pull(5));
    }

    #[test]
    fn test_fresh_gate_never_defers() {
        let gate = StalenessGate::new(0);
        assert!(!gate.defer_pull(0));
        assert!(!gate.defer_pull(7));
    }
}
