use std::sync::{Arc, atomic::AtomicBool};

use comms::{
    ClusterConfig, ClusterView, MsgType, NodeId, Role, Transport, TransportConfig,
    specs::server::ServerSpec, sync::Barrier,
};
use log::info;

use super::{
    ServerState,
    handlers::{FinHandler, PullHandler, PushHandler},
};
use crate::Result;

/// A parameter server node: owns one shard of the parameters.
pub struct ParameterServer {
    transport: Arc<Transport>,
    state: Arc<ServerState>,
    view: ClusterView,
    fin: Arc<Barrier>,
}

impl ParameterServer {
    /// Binds a transport, registers the request handlers and joins the cluster.
    ///
    /// Returns once the master acknowledged the whole cluster.
    ///
    /// # Arguments
    /// * `cluster` - Where the master lives.
    /// * `transport_config` - This node's socket settings.
    /// * `spec` - The update rule and bounds to serve with.
    pub async fn join(
        cluster: &ClusterConfig,
        transport_config: TransportConfig,
        spec: ServerSpec,
    ) -> Result<Self> {
        let transport = Transport::bind(transport_config).await?;
        let state = Arc::new(ServerState::new(&spec));
        let fin = Arc::new(Barrier::new(1));

        transport.register_handler(MsgType::RequestPull, PullHandler(state.clone()));
        transport.register_handler(MsgType::RequestPush, PushHandler(state.clone()));
        transport.register_handler(
            MsgType::RequestFin,
            FinHandler {
                received: AtomicBool::new(false),
                barrier: fin.clone(),
            },
        );

        let view = comms::join_cluster(&transport, Role::Server, cluster.master_addr).await?;
        info!(
            "parameter server {} serving {} workers",
            view.node_id,
            view.len()
        );

        Ok(Self {
            transport,
            state,
            view,
            fin,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.view.node_id
    }

    /// The 0-based index of the shard this server owns.
    pub fn shard(&self) -> usize {
        self.view.node_id.server_shard().unwrap_or_default()
    }

    pub fn view(&self) -> &ClusterView {
        &self.view
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Serves requests until the master's FIN arrives, then shuts down.
    ///
    /// # Returns
    /// The shared state, still holding the final tables.
    pub async fn serve(self) -> Arc<ServerState> {
        self.fin.block().await;
        self.transport.shutdown().await;

        info!(
            "parameter server {} done: keys={} stats={:?}",
            self.view.node_id,
            self.state.keys().len(),
            self.state.stats()
        );

        self.state
    }
}
