use std::{collections::HashMap, sync::Arc};

use comms::{
    ClusterConfig, ClusterView, NodeId, Role, Transport, TransportConfig, specs::worker::WorkerSpec,
};
use log::info;

use crate::{ConsistentHash, Context, Pull, Push, Result, WorkerErr, fusion::BufferFusion};

/// A parameter server mode worker node.
pub struct Worker {
    view: ClusterView,
    ctx: Arc<Context>,
    pull: Pull,
    push: Push,
}

impl Worker {
    /// Binds a transport and joins the cluster as a worker.
    ///
    /// # Args
    /// * `cluster` - Where the master is.
    /// * `transport_config` - This node's socket settings.
    /// * `spec` - The pull and push client settings.
    ///
    /// # Returns
    /// The worker once the master listed the parameter servers, or
    /// `WorkerErr::EmptyCluster` if it listed none.
    pub async fn join(
        cluster: &ClusterConfig,
        transport_config: TransportConfig,
        spec: WorkerSpec,
    ) -> Result<Self> {
        let transport = Transport::bind(transport_config).await?;
        let view = comms::join_cluster(&transport, Role::Worker, cluster.master_addr).await?;

        if view.is_empty() {
            comms::leave_cluster(&transport).await?;
            transport.shutdown().await;
            return Err(WorkerErr::EmptyCluster);
        }

        info!(
            "worker {} placing keys over {} parameter servers",
            view.node_id,
            view.len()
        );

        let ctx = Arc::new(Context::new(transport, ConsistentHash::new(view.len())));

        Ok(Self {
            view,
            pull: Pull::new(ctx.clone(), &spec),
            push: Push::new(ctx.clone(), &spec),
            ctx,
        })
    }

    /// The 0-based rank among workers.
    pub fn rank(&self) -> usize {
        self.view.rank().unwrap_or_default()
    }

    pub fn node_id(&self) -> NodeId {
        self.view.node_id
    }

    pub fn view(&self) -> &ClusterView {
        &self.view
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Overwrites every value of `params` with the servers' current one.
    pub async fn pull(&self, params: &mut HashMap<u64, f32>, epoch: u64) -> Result<()> {
        self.pull.sync(params, epoch).await
    }

    /// Sends `grads` to the servers owning their keys.
    pub async fn push(&self, grads: &HashMap<u64, f32>, epoch: u64) -> Result<()> {
        self.push.sync(grads, epoch).await
    }

    pub async fn pull_tensors(&self, arena: &mut BufferFusion<'_, f32>, epoch: u64) -> Result<()> {
        self.pull.sync_tensors(arena, epoch).await
    }

    pub async fn push_tensors(&self, arena: &BufferFusion<'_, f32>, epoch: u64) -> Result<()> {
        self.push.sync_tensors(arena, epoch).await
    }

    /// Tells the master this worker is done and closes the transport.
    pub async fn shutdown(self) -> Result<()> {
        comms::leave_cluster(&self.ctx.transport).await?;
        self.ctx.transport.shutdown().await;
        info!("worker {} shut down", self.view.node_id);
        Ok(())
    }
}
