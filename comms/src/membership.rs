//! Joining and leaving the cluster through the master.
//!
//! A node registers its listen address with a handshake, receives its id in
//! the response and then waits for the master's ACK listing the peers it has
//! to talk to.

use std::{
    io,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::{
    Buffer, Envelope, Handler, MsgType, NodeAddress, NodeId, Result, Transport, TransportErr,
    sync::Barrier,
};

/// The part a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A parameter server, told about every worker.
    Server,
    /// A parameter server mode worker, told about every server.
    Worker,
    /// A ring mode worker, told about every other worker.
    RingWorker,
}

impl Role {
    /// The sender id used before the master assigns one.
    pub fn placeholder(self) -> NodeId {
        match self {
            Role::Server => NodeId::SERVER_PLACEHOLDER,
            Role::Worker | Role::RingWorker => NodeId::WORKER_PLACEHOLDER,
        }
    }

    /// The id of the `index`th entry of the ACK list this role receives.
    fn listed_id(self, index: usize) -> NodeId {
        match self {
            Role::Worker => NodeId::server(index),
            Role::Server | Role::RingWorker => NodeId::worker(index),
        }
    }
}

/// What a node learned while joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterView {
    pub node_id: NodeId,
    pub role: Role,
    /// Every node listed in the ACK, self included for ring workers.
    pub peers: Vec<(NodeId, NodeAddress)>,
}

impl ClusterView {
    /// The amount of listed nodes: servers for a worker, workers otherwise.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// The 0-based worker rank, `None` for servers.
    pub fn rank(&self) -> Option<usize> {
        self.node_id.worker_rank()
    }
}

/// Encodes the ACK body: every address as a varint length prefixed string.
pub fn encode_address_list(addrs: &[NodeAddress]) -> Buffer {
    let mut buf = Buffer::new();
    for addr in addrs {
        buf.put_bytes(addr.to_string().as_bytes());
    }
    buf
}

/// Decodes an ACK body built by `encode_address_list`.
pub fn decode_address_list(buf: &mut Buffer) -> io::Result<Vec<NodeAddress>> {
    let mut addrs = Vec::new();

    while !buf.read_eof() {
        let raw = str::from_utf8(buf.read_bytes()?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let addr = raw
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        addrs.push(addr);
    }

    Ok(addrs)
}

type AckOutcome = Result<Vec<(NodeId, NodeAddress)>>;

/// Serves the master's ACK: registers every listed peer and releases the joiner.
struct AckHandler {
    transport: Weak<Transport>,
    role: Role,
    acked: AtomicBool,
    outcome: Arc<Mutex<Option<AckOutcome>>>,
    barrier: Arc<Barrier>,
}

impl AckHandler {
    async fn register_listed(&self, transport: &Transport, body: &Buffer) -> AckOutcome {
        let mut body = body.clone();
        body.reset_cursor();

        let addrs = decode_address_list(&mut body)?;
        let local = transport.local_addr();

        let mut listed = Vec::with_capacity(addrs.len());
        for (i, addr) in addrs.into_iter().enumerate() {
            let id = self.role.listed_id(i);
            if addr != local {
                transport.register_peer(id, addr).await?;
            }
            listed.push((id, addr));
        }

        Ok(listed)
    }
}

#[async_trait::async_trait]
impl Handler for AckHandler {
    async fn handle(&self, request: &Envelope, _response: &mut Envelope) {
        if self.acked.swap(true, Ordering::AcqRel) {
            debug!("ignoring repeated ACK {}", request.message_id);
            return;
        }

        let Some(transport) = self.transport.upgrade() else {
            return;
        };

        let outcome = self.register_listed(&transport, &request.body).await;
        if let Err(e) = &outcome {
            error!("failed to connect to the listed peers: {e}");
        }

        *self.outcome.lock() = Some(outcome);
        self.barrier.unblock();
    }
}

/// Registers with the master and waits until the cluster is complete.
///
/// Registers the `REQUEST_ACK` handler on `transport`.
///
/// # Arguments
/// * `transport` - This node's transport, its id is set on success.
/// * `role` - The part this node plays.
/// * `master_addr` - Where the master listens.
///
/// # Returns
/// The assigned id and the listed peers, `TransportErr::Refused` if the
/// cluster is already full or an error if a peer is unreachable.
pub async fn join_cluster(
    transport: &Arc<Transport>,
    role: Role,
    master_addr: NodeAddress,
) -> Result<ClusterView> {
    transport.set_node_id(role.placeholder());
    transport.register_peer(NodeId::MASTER, master_addr).await?;

    let barrier = Arc::new(Barrier::new(1));
    let outcome = Arc::new(Mutex::new(None));

    transport.register_handler(
        MsgType::RequestAck,
        AckHandler {
            transport: Arc::downgrade(transport),
            role,
            acked: AtomicBool::new(false),
            outcome: outcome.clone(),
            barrier: barrier.clone(),
        },
    );

    let addr = transport.local_addr();
    let mut body = Buffer::new();
    body.append(addr.to_string().as_bytes());

    let mut response = request_until_answered(
        transport,
        Envelope::with_body(MsgType::RequestHandshake, 0, body),
    )
    .await?;

    if response.body.is_empty() {
        warn!("master at {master_addr} refused {addr}");
        return Err(TransportErr::Refused);
    }

    let node_id = NodeId(response.body.read_varint()? as u32);
    transport.set_node_id(node_id);
    info!("registered {addr} as node {node_id}, waiting for the cluster");

    barrier.block().await;

    let peers = outcome.lock().take().ok_or(TransportErr::Shutdown)??;
    info!("node {node_id} joined a cluster of {} listed peers", peers.len());

    Ok(ClusterView {
        node_id,
        role,
        peers,
    })
}

/// Tells the master this node is done, waiting until it acknowledges.
pub async fn leave_cluster(transport: &Transport) -> Result<()> {
    request_until_answered(transport, Envelope::new(MsgType::RequestFin, 0)).await?;
    info!("node {} left the cluster", transport.node_id());
    Ok(())
}

/// Sends `request` to the master until a response arrives, one attempt per round trip.
async fn request_until_answered(transport: &Transport, request: Envelope) -> Result<Envelope> {
    let rtt_timeout = transport.config().rtt_timeout();

    loop {
        let attempt = transport
            .send_sync(request.clone(), NodeId::MASTER, rtt_timeout)
            .await?;

        match attempt {
            Some(response) => return Ok(response),
            None => warn!("master didn't answer {:?}, retrying", request.kind),
        }
    }
}
