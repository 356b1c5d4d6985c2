//! Ring all-reduce over the workers, no parameter servers involved.
//!
//! The vector is split in one segment per worker. A reduce-scatter pass leaves
//! every worker with one fully summed segment, an all-gather pass then hands
//! every summed segment around the ring. Each hop is identified by a step
//! number that only grows, so segments arriving early are cached until their
//! hop comes and duplicates of consumed hops are ignored.

use std::{
    collections::BTreeMap,
    ops::Range,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use comms::{
    Buffer, ClusterConfig, ClusterView, Envelope, MsgType, NodeId, Role, Tag, Transport,
    TransportConfig, codec, specs::worker::RingSpec, sync::Barrier,
};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::{Result, WorkerErr, fusion::BufferFusion};

/// The split of a vector of `n` elements among `r` ring members.
///
/// The first `n mod r` segments hold one extra element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segments {
    /// `ends[i]` is the offset one past segment `i`.
    ends: Vec<usize>,
}

impl Segments {
    /// # Panics
    /// If `r` is zero.
    pub fn new(n: usize, r: usize) -> Self {
        assert!(r > 0, "a ring needs at least one member");

        let (base, extra) = (n / r, n % r);
        let mut end = 0;

        let ends = (0..r)
            .map(|i| {
                end += base + usize::from(i < extra);
                end
            })
            .collect();

        Self { ends }
    }

    pub fn count(&self) -> usize {
        self.ends.len()
    }

    pub fn range(&self, i: usize) -> Range<usize> {
        let start = if i == 0 { 0 } else { self.ends[i - 1] };
        start..self.ends[i]
    }
}

#[derive(Debug, Default)]
struct InboxState {
    /// The step the local hop is waiting for, if any.
    expected: Option<u64>,
    /// Every step up to this one was consumed.
    consumed_through: u64,
    cache: BTreeMap<u64, Vec<f32>>,
}

/// Segments received from the left neighbour, keyed by step.
#[derive(Debug)]
struct Inbox {
    state: Mutex<InboxState>,
    barrier: Barrier,
    left: AtomicU32,
}

impl Inbox {
    fn new() -> Self {
        Self {
            state: Mutex::default(),
            barrier: Barrier::new(0),
            left: AtomicU32::new(NodeId::WORKER_PLACEHOLDER.0),
        }
    }

    /// Stores an inbound segment and acknowledges it with its step.
    fn receive(&self, request: &Envelope, response: &mut Envelope) {
        let step = request.epoch;
        response.epoch = step;

        let left = NodeId(self.left.load(Ordering::Acquire));
        if request.sender != left {
            warn!(
                from = request.sender.0, step = step;
                "ring segment from a node other than the left neighbour {left}"
            );
        }

        let mut body = request.body.clone();
        body.reset_cursor();

        let values = match decode_segment(&mut body) {
            Ok(values) => values,
            Err(e) => {
                warn!("dropping malformed ring segment at step {step}: {e}");
                return;
            }
        };

        let mut state = self.state.lock();
        if step <= state.consumed_through || state.cache.contains_key(&step) {
            debug!("duplicate ring segment for step {step}");
            return;
        }

        state.cache.insert(step, values);
        if state.expected == Some(step) {
            state.expected = None;
            self.barrier.unblock();
        }
    }

    /// Arms the barrier for `step`, releasing it at once if the segment already arrived.
    fn expect(&self, step: u64) {
        let mut state = self.state.lock();
        self.barrier.reset(1);

        if state.cache.contains_key(&step) {
            self.barrier.unblock();
        } else {
            state.expected = Some(step);
        }
    }

    /// Takes the segment of `step`, marking every step up to it consumed.
    fn take(&self, step: u64) -> Option<Vec<f32>> {
        let mut state = self.state.lock();
        state.consumed_through = step;

        let values = state.cache.remove(&step);
        state.cache.retain(|&cached, _| cached > step);
        values
    }

    fn consumed_through(&self) -> u64 {
        self.state.lock().consumed_through
    }
}

fn decode_segment(body: &mut Buffer) -> std::io::Result<Vec<f32>> {
    if Tag::read(body)? != Some(Tag::Dense) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "ring segments travel as dense bodies",
        ));
    }

    Ok(codec::decode_tensors(body)?
        .into_iter()
        .next()
        .map(|tensor| tensor.values)
        .unwrap_or_default())
}

/// What a hop does with the segment it receives.
#[derive(Clone, Copy)]
enum Merge {
    Add,
    Overwrite,
}

/// A member of the ring all-reduce.
pub struct RingReduce {
    transport: Arc<Transport>,
    view: ClusterView,
    rank: usize,
    inbox: Arc<Inbox>,
    segments: Segments,
    vector_size: usize,
    hop_timeout: Duration,
    average: bool,
}

impl RingReduce {
    /// Binds a transport and joins the cluster as a ring worker.
    ///
    /// # Arguments
    /// * `cluster` - Where the master is.
    /// * `transport_config` - This node's socket settings.
    /// * `spec` - The hop timeout and whether to average.
    /// * `vector_size` - The length of every vector reduced through `sync`.
    ///
    /// # Returns
    /// The ring member once every worker joined.
    pub async fn join(
        cluster: &ClusterConfig,
        transport_config: TransportConfig,
        spec: RingSpec,
        vector_size: usize,
    ) -> Result<Self> {
        let transport = Transport::bind(transport_config).await?;
        let inbox = Arc::new(Inbox::new());

        let receiver = inbox.clone();
        transport.register_fn(MsgType::RequestPush, move |request, response| {
            receiver.receive(request, response)
        });

        let view = comms::join_cluster(&transport, Role::RingWorker, cluster.master_addr).await?;
        let (Some(rank), false) = (view.rank(), view.is_empty()) else {
            transport.shutdown().await;
            return Err(WorkerErr::EmptyCluster);
        };

        let size = view.len();
        inbox
            .left
            .store(NodeId::worker((rank + size - 1) % size).0, Ordering::Release);

        info!("ring member {rank} of {size} ready, reducing vectors of {vector_size}");

        Ok(Self {
            transport,
            view,
            rank,
            inbox,
            segments: Segments::new(vector_size, size),
            vector_size,
            hop_timeout: spec.hop_timeout(),
            average: spec.average,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The amount of ring members.
    pub fn size(&self) -> usize {
        self.view.len()
    }

    pub fn node_id(&self) -> NodeId {
        self.view.node_id
    }

    /// Sums `arena` elementwise with every other member's, in place.
    ///
    /// Every member must call it with the same epoch, epochs must increase
    /// from one call to the next.
    ///
    /// # Panics
    /// If the arena size isn't the one given on `join` or the epoch didn't increase.
    pub async fn sync(&self, epoch: u64, arena: &mut BufferFusion<'_, f32>) -> Result<()> {
        assert_eq!(
            arena.size(),
            self.vector_size,
            "arena doesn't match the ring vector size"
        );

        let r = self.size();
        if r > 1 {
            let hops = r as u64 - 1;
            let base = epoch * 2 * hops;
            assert!(
                base + 1 > self.inbox.consumed_through(),
                "ring epochs must increase, got {epoch}"
            );

            for hop in 0..r - 1 {
                let send = (self.rank + r - hop) % r;
                let recv = (self.rank + r - hop - 1) % r;
                self.hop(base + hop as u64 + 1, send, recv, Merge::Add, arena)
                    .await?;
            }

            for hop in 0..r - 1 {
                let send = (self.rank + 1 + r - hop) % r;
                let recv = (self.rank + r - hop) % r;
                self.hop(base + hops + hop as u64 + 1, send, recv, Merge::Overwrite, arena)
                    .await?;
            }

            debug!("ring member {} reduced epoch {epoch}", self.rank);
        }

        if self.average {
            let scale = 1.0 / r as f32;
            arena.transform(0, self.vector_size, |piece| {
                piece.iter_mut().for_each(|x| *x *= scale)
            });
        }

        Ok(())
    }

    /// Sends segment `send` to the right neighbour while waiting for segment
    /// `recv` from the left one, then merges it into `arena`.
    async fn hop(
        &self,
        step: u64,
        send: usize,
        recv: usize,
        merge: Merge,
        arena: &mut BufferFusion<'_, f32>,
    ) -> Result<()> {
        let outgoing = self.segments.range(send);
        let mut values = vec![0.0; outgoing.len()];
        arena.copy_out(outgoing.start, &mut values);

        let mut body = codec::dense_body();
        codec::put_tensor(&mut body, outgoing.start as u64, &values);

        self.inbox.expect(step);
        let (sent, ()) = futures::future::join(
            self.send_until_acked(step, body),
            self.inbox.barrier.block(),
        )
        .await;
        sent?;

        let incoming = self.segments.range(recv);
        let left = self.left();

        let received = self.inbox.take(step).ok_or(WorkerErr::UnexpectedBody {
            from: left,
            step,
            got: "no segment",
        })?;

        if received.len() != incoming.len() {
            return Err(WorkerErr::UnexpectedBody {
                from: left,
                step,
                got: "a segment of the wrong length",
            });
        }

        match merge {
            Merge::Add => {
                let mut i = 0;
                arena.transform(incoming.start, incoming.len(), |piece| {
                    for x in piece {
                        *x += received[i];
                        i += 1;
                    }
                });
            }
            Merge::Overwrite => arena.copy_in(incoming.start, &received),
        }

        Ok(())
    }

    async fn send_until_acked(&self, step: u64, body: Buffer) -> Result<()> {
        let right = self.right();

        loop {
            let request = Envelope::with_body(MsgType::RequestPush, step, body.clone());
            match self
                .transport
                .send_sync(request, right, self.hop_timeout)
                .await?
            {
                Some(ack) if ack.epoch == step => return Ok(()),
                Some(ack) => warn!("ring ack for step {} while sending {step}", ack.epoch),
                None => debug!("ring step {step} not acknowledged by {right}, resending"),
            }
        }
    }

    fn left(&self) -> NodeId {
        let r = self.size();
        NodeId::worker((self.rank + r - 1) % r)
    }

    fn right(&self) -> NodeId {
        NodeId::worker((self.rank + 1) % self.size())
    }

    /// Leaves the cluster and closes the transport.
    pub async fn shutdown(self) -> Result<()> {
        comms::leave_cluster(&self.transport).await?;
        self.transport.shutdown().await;
        Ok(())
    }
}
