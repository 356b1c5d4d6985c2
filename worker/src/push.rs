use std::{collections::HashMap, sync::Arc};

use comms::{Buffer, MagnitudeFilter, MsgType, NodeId, codec, specs::worker::WorkerSpec};
use log::debug;

use crate::{Context, Result, fusion::BufferFusion};

/// Sends gradients to the servers owning their keys.
pub struct Push {
    ctx: Arc<Context>,
    filter: MagnitudeFilter,
}

impl Push {
    /// Creates a new `Push` client.
    ///
    /// # Arguments
    /// * `ctx` - The transport and key placement.
    /// * `spec` - Holds the magnitude window of pushed gradients.
    pub fn new(ctx: Arc<Context>, spec: &WorkerSpec) -> Self {
        Self {
            ctx,
            filter: spec.push_filter,
        }
    }

    /// Pushes every gradient inside the magnitude window, waiting until all
    /// servers applied their part.
    ///
    /// # Panics
    /// If a gradient isn't finite.
    pub async fn sync(&self, grads: &HashMap<u64, f32>, epoch: u64) -> Result<()> {
        assert!(
            grads.values().all(|g| g.is_finite()),
            "pushed a non finite gradient at epoch {epoch}"
        );

        let mut by_shard = vec![Vec::new(); self.ctx.hash.shards()];
        let mut filtered = 0;

        for (&key, &grad) in grads {
            if self.filter.accepts(grad) {
                by_shard[self.ctx.hash.get_node(key)].push((key, grad));
            } else {
                filtered += 1;
            }
        }

        if filtered > 0 {
            debug!("{filtered} gradients outside the push window at epoch {epoch}");
        }

        let requests: Vec<_> = by_shard
            .into_iter()
            .enumerate()
            .filter(|(_, pairs)| !pairs.is_empty())
            .map(|(shard, pairs)| (NodeId::server(shard), codec::encode_pairs(pairs)))
            .collect();

        self.send_all(epoch, requests).await
    }

    /// Pushes every chunk of `arena` as a gradient for the tensor at its offset.
    ///
    /// # Panics
    /// If a gradient isn't finite.
    pub async fn sync_tensors(&self, arena: &BufferFusion<'_, f32>, epoch: u64) -> Result<()> {
        let mut by_shard = vec![codec::dense_body(); self.ctx.hash.shards()];
        let mut used = vec![false; self.ctx.hash.shards()];

        for (i, (offset, _)) in arena.layout().into_iter().enumerate() {
            let values = arena.chunk(i);
            assert!(
                values.iter().all(|g| g.is_finite()),
                "pushed a non finite gradient at offset {offset}, epoch {epoch}"
            );

            let shard = self.ctx.hash.get_node(offset as u64);
            codec::put_tensor(&mut by_shard[shard], offset as u64, values);
            used[shard] = true;
        }

        let requests: Vec<_> = by_shard
            .into_iter()
            .enumerate()
            .filter(|(shard, _)| used[*shard])
            .map(|(shard, body)| (NodeId::server(shard), body))
            .collect();

        self.send_all(epoch, requests).await
    }

    async fn send_all(&self, epoch: u64, requests: Vec<(NodeId, Buffer)>) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }

        self.ctx
            .fan_out(MsgType::RequestPush, epoch, requests)
            .await?;
        Ok(())
    }
}
