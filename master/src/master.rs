use std::{
    collections::HashSet,
    sync::{Arc, Weak},
};

use comms::{
    Buffer, ClusterConfig, Envelope, Handler, MsgType, NodeAddress, NodeId, RunMode, Transport,
    TransportConfig, membership, sync::Barrier,
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    MasterErr, Result,
    heartbeat::{self, HeartbeatConfig, LinkState, LinkTable},
    registry::{Admission, Registry},
};

/// Refused nodes get a transient id counting down from here, so their empty
/// response can be routed.
const REFUSED_ID_BASE: u32 = u32::MAX;

/// Assigns ids to joining nodes and releases the cluster once all joined.
struct HandshakeHandler {
    transport: Weak<Transport>,
    registry: Arc<Mutex<Registry>>,
    registered: Arc<Barrier>,
    refused: Mutex<u32>,
}

impl HandshakeHandler {
    fn parse_addr(request: &Envelope) -> Option<NodeAddress> {
        str::from_utf8(request.body.as_bytes()).ok()?.parse().ok()
    }
}

#[async_trait::async_trait]
impl Handler for HandshakeHandler {
    async fn handle(&self, request: &Envelope, response: &mut Envelope) {
        let Some(transport) = self.transport.upgrade() else {
            return;
        };

        let Some(addr) = Self::parse_addr(request) else {
            warn!("handshake {} carries no valid address", request.message_id);
            return;
        };

        let admission = self.registry.lock().register(request.sender, addr);
        let id = match admission {
            Admission::Admitted(id) | Admission::Repeated(id) => id,
            Admission::Refused => {
                let mut refused = self.refused.lock();
                let id = NodeId(REFUSED_ID_BASE - *refused);
                *refused += 1;
                id
            }
        };

        let known = matches!(admission, Admission::Repeated(_)) && transport.has_peer(id);
        if !known && let Err(e) = transport.register_peer(id, addr).await {
            warn!("can't reach {addr} to answer its handshake: {e}");
            return;
        }

        response.to = id;
        match admission {
            Admission::Admitted(id) => {
                info!("registered {addr} as node {id}");
                response.body.put_varint(id.0 as u64);
                self.registered.unblock();
            }
            Admission::Repeated(id) => {
                debug!("{addr} repeated its handshake, still node {id}");
                response.body.put_varint(id.0 as u64);
            }
            Admission::Refused => warn!("refused {addr}, the cluster is full"),
        }
    }
}

/// Counts the workers that finished, once each.
struct FinHandler {
    finished: Mutex<HashSet<NodeId>>,
    barrier: Arc<Barrier>,
    links: Arc<LinkTable>,
}

#[async_trait::async_trait]
impl Handler for FinHandler {
    async fn handle(&self, request: &Envelope, _response: &mut Envelope) {
        let worker = request.sender;
        if !worker.is_worker() || !self.finished.lock().insert(worker) {
            debug!("ignoring FIN {} from {worker}", request.message_id);
            return;
        }

        self.links.retire(worker);
        info!("worker {worker} finished");
        self.barrier.unblock();
    }
}

/// Coordinates the cluster: bootstrap, liveness and shutdown.
pub struct Master {
    cluster: ClusterConfig,
    transport: Arc<Transport>,
    registry: Arc<Mutex<Registry>>,
    registered: Arc<Barrier>,
    finished: Arc<Barrier>,
    links: Arc<LinkTable>,
    heartbeat: HeartbeatConfig,
    monitors: TaskTracker,
    cancel: CancellationToken,
}

impl Master {
    /// Creates a new `Master` listening on the cluster's master address.
    ///
    /// # Arguments
    /// * `cluster` - The expected cluster shape and where to listen.
    /// * `transport_config` - Socket settings, its listen address is replaced.
    ///
    /// # Returns
    /// `MasterErr::InvalidConfig` if the cluster shape doesn't fit its run mode.
    pub async fn bind(cluster: ClusterConfig, mut transport_config: TransportConfig) -> Result<Self> {
        validate(&cluster)?;

        transport_config.listen = cluster.master_addr;
        let transport = Transport::bind(transport_config).await?;
        transport.set_node_id(NodeId::MASTER);

        let registry = Arc::new(Mutex::new(Registry::new(
            cluster.ps_count,
            cluster.worker_count,
        )));
        let registered = Arc::new(Barrier::new(cluster.ps_count + cluster.worker_count));
        let finished = Arc::new(Barrier::new(cluster.worker_count));
        let links = Arc::new(LinkTable::default());

        transport.register_handler(
            MsgType::RequestHandshake,
            HandshakeHandler {
                transport: Arc::downgrade(&transport),
                registry: registry.clone(),
                registered: registered.clone(),
                refused: Mutex::new(0),
            },
        );

        transport.register_handler(
            MsgType::RequestFin,
            FinHandler {
                finished: Mutex::default(),
                barrier: finished.clone(),
                links: links.clone(),
            },
        );

        info!(
            "master listening on {} for {} servers and {} workers in {:?} mode",
            transport.local_addr(),
            cluster.ps_count,
            cluster.worker_count,
            cluster.mode
        );

        Ok(Self {
            cluster,
            transport,
            registry,
            registered,
            finished,
            links,
            heartbeat: HeartbeatConfig::default(),
            monitors: TaskTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Replaces the probe timing of the heartbeat monitors.
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn local_addr(&self) -> NodeAddress {
        self.transport.local_addr()
    }

    /// The link state of a registered node, `None` if unknown or finished.
    pub fn link_state(&self, id: NodeId) -> Option<LinkState> {
        self.links.state(id)
    }

    /// Runs the cluster from bootstrap to shutdown.
    ///
    /// Waits for every node to register, sends each its ACK, waits for every
    /// worker to finish and then stops the servers.
    pub async fn run(&self) -> Result<()> {
        self.registered.block().await;

        let (servers, workers) = {
            let registry = self.registry.lock();
            (registry.servers().to_vec(), registry.workers().to_vec())
        };
        info!(
            "cluster complete with {} servers and {} workers",
            servers.len(),
            workers.len()
        );

        self.start_monitors();

        let server_ids: Vec<_> = (0..servers.len()).map(NodeId::server).collect();
        let worker_ids: Vec<_> = (0..workers.len()).map(NodeId::worker).collect();

        match self.cluster.mode {
            RunMode::ParameterServer => {
                let worker_list = membership::encode_address_list(&workers);
                self.request_all(MsgType::RequestAck, &server_ids, &worker_list)
                    .await?;

                let server_list = membership::encode_address_list(&servers);
                self.request_all(MsgType::RequestAck, &worker_ids, &server_list)
                    .await?;
            }
            RunMode::Ring => {
                let worker_list = membership::encode_address_list(&workers);
                self.request_all(MsgType::RequestAck, &worker_ids, &worker_list)
                    .await?;
            }
        }
        info!("every node acknowledged, training started");

        self.finished.block().await;
        info!("every worker finished, stopping the servers");

        let reachable: Vec<_> = server_ids
            .into_iter()
            .filter(|&id| {
                let known = self.transport.has_peer(id);
                if !known {
                    warn!("server {id} is gone, not stopping it");
                }
                known
            })
            .collect();

        self.request_all(MsgType::RequestFin, &reachable, &Buffer::new())
            .await?;

        self.cancel.cancel();
        self.monitors.close();
        self.monitors.wait().await;

        self.transport.shutdown().await;
        info!("master shut down");
        Ok(())
    }

    fn start_monitors(&self) {
        let ids = {
            let registry = self.registry.lock();
            let mut ids = registry.server_ids();
            ids.extend(registry.worker_ids());
            ids
        };

        for id in ids {
            self.links.insert(id);
            self.monitors.spawn(heartbeat::monitor(
                self.transport.clone(),
                self.links.clone(),
                id,
                self.heartbeat.clone(),
                self.cancel.clone(),
            ));
        }
    }

    /// Sends `body` to every node in `to` and waits until all of them answered.
    async fn request_all(&self, kind: MsgType, to: &[NodeId], body: &Buffer) -> Result<()> {
        let barrier = Arc::new(Barrier::new(to.len()));

        for &id in to {
            let barrier = barrier.clone();
            self.transport
                .send_with(Envelope::with_body(kind, 0, body.clone()), id, move |_| {
                    barrier.unblock()
                })?;
        }

        barrier.block().await;
        Ok(())
    }
}

fn validate(cluster: &ClusterConfig) -> Result<()> {
    match cluster.mode {
        _ if cluster.worker_count == 0 => Err(MasterErr::InvalidConfig(
            "a cluster needs at least one worker".into(),
        )),
        RunMode::ParameterServer if cluster.ps_count == 0 => Err(MasterErr::InvalidConfig(
            "parameter server mode needs at least one server".into(),
        )),
        RunMode::Ring if cluster.ps_count > 0 => Err(MasterErr::InvalidConfig(
            "ring mode runs without servers".into(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_shape_validation() {
        let ps = ClusterConfig {
            ps_count: 2,
            worker_count: 2,
            ..Default::default()
        };
        assert!(validate(&ps).is_ok());

        let no_servers = ClusterConfig {
            ps_count: 0,
            ..ps.clone()
        };
        assert!(matches!(validate(&no_servers), Err(MasterErr::InvalidConfig(_))));

        let ring = ClusterConfig {
            mode: RunMode::Ring,
            ..no_servers.clone()
        };
        assert!(validate(&ring).is_ok());

        let ring_with_servers = ClusterConfig {
            mode: RunMode::Ring,
            ..ps.clone()
        };
        assert!(validate(&ring_with_servers).is_err());

        let no_workers = ClusterConfig {
            worker_count: 0,
            ..ps
        };
        assert!(validate(&no_workers).is_err());
    }
}
