use std::collections::HashMap;

use parking_lot::RwLock;

use crate::{
    optimization::Updater,
    storage::{Entry, TableStats},
};

/// The sparse parameters a server owns, keyed by feature id.
///
/// Entries are created on first use with a zero value. Readers only ever see
/// the published snapshot of an entry.
#[derive(Debug, Default)]
pub struct ShardedKeyTable {
    entries: RwLock<HashMap<u64, Entry>>,
}

impl ShardedKeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the published value of `key`, if it exists.
    pub fn get(&self, key: u64) -> Option<f32> {
        self.entries.read().get(&key).map(Entry::snapshot)
    }

    /// Reads the published values of `keys`, creating the missing ones.
    ///
    /// # Arguments
    /// * `keys` - The requested keys.
    ///
    /// # Returns
    /// One `(key, value)` pair per requested key, in the request order.
    pub fn pull(&self, keys: &[u64]) -> Vec<(u64, f32)> {
        let mut values: Vec<_> = {
            let entries = self.entries.read();
            keys.iter()
                .map(|key| (*key, entries.get(key).map(Entry::snapshot)))
                .collect()
        };

        if values.iter().any(|(_, value)| value.is_none()) {
            let mut entries = self.entries.write();

            for (key, value) in values.iter_mut().filter(|(_, value)| value.is_none()) {
                let entry = entries.entry(*key).or_insert_with(|| Entry::new(0.));
                *value = Some(entry.snapshot());
            }
        }

        values
            .into_iter()
            .map(|(key, value)| (key, value.unwrap_or_default()))
            .collect()
    }

    /// Applies a batch of gradients with `updater`, republishing every touched entry.
    ///
    /// Non finite gradients are skipped and counted.
    ///
    /// # Arguments
    /// * `grads` - `(key, gradient)` pairs.
    /// * `worker` - The rank of the pushing worker.
    /// * `updater` - The update rule.
    /// * `stats` - Where skipped gradients are counted.
    pub fn push(&self, grads: &[(u64, f32)], worker: usize, updater: &dyn Updater, stats: &TableStats) {
        let mut skipped = 0;
        let mut entries = self.entries.write();

        for &(key, grad) in grads {
            if !grad.is_finite() {
                skipped += 1;
                continue;
            }

            let entry = entries.entry(key).or_insert_with(|| Entry::new(0.));
            updater.update(entry, grad, worker);
            entry.publish();
        }

        drop(entries);

        if skipped > 0 {
            stats.non_finite(skipped);
        }
    }

    /// Copies every published value.
    pub fn snapshot(&self) -> HashMap<u64, f32> {
        self.entries
            .read()
            .iter()
            .map(|(key, entry)| (*key, entry.snapshot()))
            .collect()
    }
}
