use std::{collections::HashMap, sync::Arc, time::Duration};

use comms::{Buffer, Envelope, MsgType, NodeId, Tag, codec, specs::worker::WorkerSpec};
use log::debug;

use crate::{Context, Result, WorkerErr, fusion::BufferFusion};

/// Fetches parameters from the servers owning them.
pub struct Pull {
    ctx: Arc<Context>,
    retry_delay: Duration,
}

impl Pull {
    /// Creates a new `Pull` client.
    ///
    /// # Arguments
    /// * `ctx` - The transport and key placement.
    /// * `spec` - Holds the pause before retrying a deferred pull.
    pub fn new(ctx: Arc<Context>, spec: &WorkerSpec) -> Self {
        Self {
            ctx,
            retry_delay: spec.pull_retry_delay(),
        }
    }

    /// Fills `params` with the servers' current value of every key it holds.
    ///
    /// Keys a server filtered out keep their previous value. If any server
    /// deferred the request, the whole pull is retried after a pause.
    ///
    /// # Arguments
    /// * `params` - The keys to pull, overwritten with the pulled values.
    /// * `epoch` - The caller's epoch.
    pub async fn sync(&self, params: &mut HashMap<u64, f32>, epoch: u64) -> Result<()> {
        let mut by_shard = vec![Vec::new(); self.ctx.hash.shards()];
        for &key in params.keys() {
            by_shard[self.ctx.hash.get_node(key)].push(key);
        }

        let requests: Vec<_> = by_shard
            .into_iter()
            .enumerate()
            .filter(|(_, keys)| !keys.is_empty())
            .map(|(shard, keys)| (NodeId::server(shard), codec::encode_keys(keys)))
            .collect();

        self.until_served(epoch, requests, |mut body, from| {
            for (key, value) in decode_sparse(&mut body, from, epoch)? {
                params.insert(key, value);
            }
            Ok(())
        })
        .await
    }

    /// Fills every chunk of `arena` with the tensor stored at its offset.
    ///
    /// Servers create missing tensors zeroed, with the chunk's length.
    pub async fn sync_tensors(&self, arena: &mut BufferFusion<'_, f32>, epoch: u64) -> Result<()> {
        let mut by_shard = vec![Vec::new(); self.ctx.hash.shards()];
        for (offset, len) in arena.layout() {
            let offset = offset as u64;
            by_shard[self.ctx.hash.get_node(offset)].push((offset, len));
        }

        let requests: Vec<_> = by_shard
            .into_iter()
            .enumerate()
            .filter(|(_, ranges)| !ranges.is_empty())
            .map(|(shard, ranges)| (NodeId::server(shard), codec::encode_ranges(ranges)))
            .collect();

        let size = arena.size();
        self.until_served(epoch, requests, |mut body, from| {
            if Tag::read(&mut body)? != Some(Tag::Dense) {
                return Err(unexpected(from, epoch, "a non dense body"));
            }

            for tensor in codec::decode_tensors(&mut body)? {
                let len = tensor.values.len();
                if tensor.offset as usize + len > size {
                    return Err(WorkerErr::TensorOutOfRange {
                        offset: tensor.offset,
                        len,
                        size,
                    });
                }

                arena.copy_in(tensor.offset as usize, &tensor.values);
            }

            Ok(())
        })
        .await
    }

    /// Sends the requests until no server defers them, feeding every served
    /// body to `apply`.
    async fn until_served<F>(
        &self,
        epoch: u64,
        requests: Vec<(NodeId, Buffer)>,
        mut apply: F,
    ) -> Result<()>
    where
        F: FnMut(Buffer, NodeId) -> Result<()>,
    {
        if requests.is_empty() {
            return Ok(());
        }

        loop {
            let responses = self
                .ctx
                .fan_out(MsgType::RequestPull, epoch, requests.clone())
                .await?;

            let mut deferred = false;
            for Envelope { sender, body, .. } in responses {
                if body.is_empty() {
                    deferred = true;
                    continue;
                }

                apply(body, sender)?;
            }

            if !deferred {
                return Ok(());
            }

            debug!("pull at epoch {epoch} deferred, retrying in {:?}", self.retry_delay);
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

fn decode_sparse(body: &mut Buffer, from: NodeId, epoch: u64) -> Result<Vec<(u64, f32)>> {
    match Tag::read(body)? {
        Some(Tag::Sparse) => Ok(codec::decode_pairs(body)?),
        _ => Err(unexpected(from, epoch, "a non sparse body")),
    }
}

fn unexpected(from: NodeId, step: u64, got: &'static str) -> WorkerErr {
    WorkerErr::UnexpectedBody { from, step, got }
}
