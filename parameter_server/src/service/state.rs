use comms::{Buffer, MagnitudeFilter, Tag, codec, specs::server::ServerSpec};
use log::{debug, warn};

use crate::{
    optimization::{self, Updater},
    storage::{ShardedKeyTable, StatsSnapshot, TableStats, TensorTable},
    synchronization::StalenessGate,
};

/// Everything a parameter server's handlers share.
pub struct ServerState {
    keys: ShardedKeyTable,
    tensors: TensorTable,
    updater: Box<dyn Updater>,
    gate: StalenessGate,
    stats: TableStats,
    pull_filter: MagnitudeFilter,
}

impl ServerState {
    /// Creates a new `ServerState` with empty tables.
    ///
    /// # Arguments
    /// * `spec` - The update rule, staleness bound and pull filter to use.
    pub fn new(spec: &ServerSpec) -> Self {
        Self {
            keys: ShardedKeyTable::new(),
            tensors: TensorTable::new(),
            updater: optimization::from_spec(spec.updater),
            gate: StalenessGate::new(spec.staleness_threshold),
            stats: TableStats::default(),
            pull_filter: spec.pull_filter,
        }
    }

    pub fn keys(&self) -> &ShardedKeyTable {
        &self.keys
    }

    pub fn tensors(&self) -> &TensorTable {
        &self.tensors
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Answers a pull request.
    ///
    /// # Arguments
    /// * `body` - The request body, keys or tensor ranges.
    /// * `epoch` - The epoch of the pulling worker.
    ///
    /// # Returns
    /// The response body, empty when the worker has to retry later.
    pub fn pull(&self, mut body: Buffer, epoch: u64) -> std::io::Result<Buffer> {
        let Some(tag) = Tag::read(&mut body)? else {
            return Ok(Buffer::new());
        };

        if self.gate.defer_pull(epoch) {
            self.stats.deferred_pull();
            debug!("deferring pull at epoch {epoch}, lag={}", self.gate.lag());
            return Ok(Buffer::new());
        }

        let response = match tag {
            Tag::Sparse => {
                let keys = codec::decode_keys(&mut body)?;
                let values = self.keys.pull(&keys);

                let (kept, filtered): (Vec<_>, Vec<_>) = values
                    .into_iter()
                    .partition(|(_, value)| self.pull_filter.accepts(*value));

                if !filtered.is_empty() {
                    self.stats.filtered(filtered.len() as u64);
                }

                codec::encode_pairs(kept)
            }
            Tag::Dense => {
                let mut response = codec::dense_body();

                for (offset, len) in codec::decode_ranges(&mut body)? {
                    match self.tensors.pull(offset, len) {
                        Ok(values) => codec::put_tensor(&mut response, offset, &values),
                        Err(e) => warn!("skipping tensor pull: {e}"),
                    }
                }

                response
            }
        };

        Ok(response)
    }

    /// Applies a push request.
    ///
    /// # Arguments
    /// * `body` - The request body, key/gradient pairs or tensors.
    /// * `epoch` - The epoch of the pushing worker.
    /// * `worker` - The rank of the pushing worker.
    pub fn push(&self, mut body: Buffer, epoch: u64, worker: usize) -> std::io::Result<()> {
        let Some(tag) = Tag::read(&mut body)? else {
            return Ok(());
        };

        if !self.gate.admit_push(worker, epoch) {
            self.stats.stale_batch();
            warn!(
                "dropping stale push from worker {worker}: epoch={epoch} last={}",
                self.gate.last_epoch()
            );
            return Ok(());
        }

        match tag {
            Tag::Sparse => {
                let grads = codec::decode_pairs(&mut body)?;
                self.keys
                    .push(&grads, worker, self.updater.as_ref(), &self.stats);
            }
            Tag::Dense => {
                let step = self.updater.tensor_step();

                for tensor in codec::decode_tensors(&mut body)? {
                    if let Some(bad) = tensor.values.iter().position(|g| !g.is_finite()) {
                        self.stats.non_finite(1);
                        warn!("skipping tensor at {} with a non finite value at {bad}", tensor.offset);
                        continue;
                    }

                    if let Err(e) = self.tensors.push(tensor.offset, &tensor.values, step) {
                        warn!("skipping tensor push: {e}");
                    }
                }
            }
        }

        Ok(())
    }
}
