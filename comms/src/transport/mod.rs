//! Request/response messaging between nodes over TCP.
//!
//! Every node listens on one socket and keeps one outbound connection per
//! registered peer. Requests stay queued until their response arrives and are
//! resent once they get older than the round trip timeout.

mod handler;
mod peer;
mod resend;

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

pub use handler::Handler;

use crate::{
    Envelope, FrameReceiver, MsgType, NodeAddress, NodeId, Result, TransportConfig, TransportErr,
    encode_frame,
    sync::{SerialExecutor, WorkerPool},
};
use handler::FnHandler;
use peer::{Peer, RetryPolicy};
use resend::{Next, Pending, ResendQueue};

type Callback = Box<dyn FnOnce(Envelope) + Send>;

/// How long `shutdown` waits for the writers to flush their queues.
const FLUSH_GRACE: Duration = Duration::from_secs(2);

/// The messaging endpoint of a node.
pub struct Transport {
    config: TransportConfig,
    local_addr: NodeAddress,
    node_id: AtomicU32,
    next_message_id: AtomicU64,
    peers: Mutex<HashMap<NodeId, Peer>>,
    handlers: Mutex<HashMap<MsgType, Arc<dyn Handler>>>,
    callbacks: Mutex<HashMap<u64, Callback>>,
    pending: ResendQueue,
    handler_pool: WorkerPool,
    callback_executor: SerialExecutor,
    /// Stops the accept loop, the readers and the retry daemon.
    io_cancel: CancellationToken,
    /// Stops writers stuck reconnecting.
    writer_cancel: CancellationToken,
    io_tasks: TaskTracker,
    writer_tasks: TaskTracker,
    closed: AtomicBool,
}

impl Transport {
    /// Binds the listen socket and starts serving.
    ///
    /// Spawns the accept loop and the retry daemon, so it must be called
    /// within a tokio runtime.
    ///
    /// # Arguments
    /// * `config` - The socket level settings.
    ///
    /// # Returns
    /// The shared transport, or an io error if the socket can't be bound.
    pub async fn bind(config: TransportConfig) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(config.listen.socket_addr()).await?;
        let local_addr = NodeAddress::try_from(listener.local_addr()?)?;

        info!("listening at {local_addr}");

        let transport = Arc::new(Self {
            handler_pool: WorkerPool::new(config.handler_threads),
            config,
            local_addr,
            node_id: AtomicU32::new(0),
            next_message_id: AtomicU64::new(1),
            peers: Mutex::default(),
            handlers: Mutex::default(),
            callbacks: Mutex::default(),
            pending: ResendQueue::default(),
            callback_executor: SerialExecutor::new(),
            io_cancel: CancellationToken::new(),
            writer_cancel: CancellationToken::new(),
            io_tasks: TaskTracker::new(),
            writer_tasks: TaskTracker::new(),
            closed: AtomicBool::new(false),
        });

        transport
            .io_tasks
            .spawn(transport.clone().accept_loop(listener));
        transport
            .io_tasks
            .spawn(transport.clone().retry_daemon());

        Ok(transport)
    }

    /// The address peers reach this node at.
    pub fn local_addr(&self) -> NodeAddress {
        self.local_addr
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn node_id(&self) -> NodeId {
        NodeId(self.node_id.load(Ordering::Acquire))
    }

    /// Sets the id stamped as sender on every outgoing message.
    pub fn set_node_id(&self, id: NodeId) {
        self.node_id.store(id.0, Ordering::Release);
    }

    /// Opens the outbound channel to a peer.
    ///
    /// Registering a known id replaces its channel, the old one is flushed and closed.
    ///
    /// # Arguments
    /// * `id` - The peer's node id, used as destination in `send`.
    /// * `addr` - The peer's listen address.
    ///
    /// # Returns
    /// `TransportErr::Unreachable` if every connect attempt failed.
    pub async fn register_peer(&self, id: NodeId, addr: NodeAddress) -> Result<()> {
        if self.is_closed() {
            return Err(TransportErr::Shutdown);
        }

        let policy = RetryPolicy::from(&self.config);
        let stream = peer::connect(addr, policy).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        self.writer_tasks.spawn(peer::write_loop(
            id,
            addr,
            stream,
            rx,
            policy,
            self.writer_cancel.clone(),
        ));

        if let Some(old) = self.peers.lock().insert(id, Peer { addr, tx }) {
            info!("peer {id} re-registered, {} replaced by {addr}", old.addr);
        } else {
            debug!("registered peer {id} at {addr}");
        }

        Ok(())
    }

    /// Closes the outbound channel to a peer once its queue is flushed.
    ///
    /// # Returns
    /// Whether the peer was registered.
    pub fn delete_peer(&self, id: NodeId) -> bool {
        self.peers.lock().remove(&id).is_some()
    }

    pub fn peer_addr(&self, id: NodeId) -> Option<NodeAddress> {
        self.peers.lock().get(&id).map(|peer| peer.addr)
    }

    pub fn has_peer(&self, id: NodeId) -> bool {
        self.peers.lock().contains_key(&id)
    }

    /// Registers the handler serving requests of `kind`.
    ///
    /// # Panics
    /// If a handler for `kind` was already registered.
    pub fn register_handler<H: Handler + 'static>(&self, kind: MsgType, handler: H) {
        let mut handlers = self.handlers.lock();
        assert!(
            !handlers.contains_key(&kind),
            "a handler for {kind:?} is already registered"
        );

        handlers.insert(kind, Arc::new(handler));
    }

    /// Registers a synchronous closure as the handler of `kind`.
    ///
    /// # Panics
    /// If a handler for `kind` was already registered.
    pub fn register_fn<F>(&self, kind: MsgType, f: F)
    where
        F: Fn(&Envelope, &mut Envelope) + Send + Sync + 'static,
    {
        self.register_handler(kind, FnHandler(f));
    }

    /// Sends `envelope` to `to` without waiting for its response.
    ///
    /// # Returns
    /// The message id assigned to the envelope.
    pub fn send(&self, envelope: Envelope, to: NodeId) -> Result<u64> {
        self.dispatch_outbound(envelope, to, None)
    }

    /// Sends `envelope` to `to`, `callback` runs once with its response.
    ///
    /// Callbacks run one at a time in the order their responses arrive.
    ///
    /// # Panics
    /// If a callback is already stored under the assigned message id.
    pub fn send_with<F>(&self, envelope: Envelope, to: NodeId, callback: F) -> Result<u64>
    where
        F: FnOnce(Envelope) + Send + 'static,
    {
        self.dispatch_outbound(envelope, to, Some(Box::new(callback)))
    }

    /// Sends `envelope` to `to` and waits for its response.
    ///
    /// # Returns
    /// `None` if no response arrived within `timeout`, the request is then forgotten.
    pub async fn send_sync(
        &self,
        envelope: Envelope,
        to: NodeId,
        timeout: Duration,
    ) -> Result<Option<Envelope>> {
        let (tx, rx) = oneshot::channel();

        let message_id = self.send_with(envelope, to, move |response| {
            let _ = tx.send(response);
        })?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(Some(response)),
            Ok(Err(_)) => Err(TransportErr::Shutdown),
            Err(_) => {
                self.forget(message_id);
                Ok(None)
            }
        }
    }

    /// Stops resending a request and drops its callback.
    ///
    /// # Returns
    /// Whether the request was still waiting for its response.
    pub fn forget(&self, message_id: u64) -> bool {
        let pending = self.pending.cancel(message_id);
        let callback = self.callbacks.lock().remove(&message_id).is_some();
        pending || callback
    }

    /// The amount of requests still waiting for their response.
    pub fn outstanding(&self) -> usize {
        self.pending.outstanding()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops the node's messaging.
    ///
    /// Stops accepting and reading, lets the in-flight handlers and callbacks
    /// finish, then flushes and closes every outbound channel. Handlers still
    /// running get their responses out before the channels close. Calling it
    /// again does nothing.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.io_cancel.cancel();
        self.io_tasks.close();
        self.io_tasks.wait().await;

        self.handler_pool.drain().await;
        self.callback_executor.drain().await;
        self.callbacks.lock().clear();

        self.peers.lock().clear();
        self.writer_tasks.close();

        if tokio::time::timeout(FLUSH_GRACE, self.writer_tasks.wait())
            .await
            .is_err()
        {
            warn!("outbound channels didn't flush in {FLUSH_GRACE:?}, closing them");
            self.writer_cancel.cancel();
        }

        info!("transport at {} shut down", self.local_addr);
    }

    fn dispatch_outbound(
        &self,
        mut envelope: Envelope,
        to: NodeId,
        callback: Option<Callback>,
    ) -> Result<u64> {
        // Responses of draining handlers still go out, the peers are cleared after the drain.
        if self.is_closed() && envelope.kind != MsgType::Response {
            return Err(TransportErr::Shutdown);
        }

        let tx = match self.peers.lock().get(&to) {
            Some(peer) => peer.tx.clone(),
            None => return Err(TransportErr::UnknownPeer(to)),
        };

        envelope.sender = self.node_id();
        envelope.to = to;
        envelope.send_time_ms = now_ms();
        if envelope.kind != MsgType::Response {
            envelope.message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        }

        let message_id = envelope.message_id;
        let frame: Arc<[u8]> = encode_frame(&envelope).into();

        if let Some(callback) = callback {
            let collision = self.callbacks.lock().insert(message_id, callback);
            assert!(
                collision.is_none(),
                "a callback is already stored for message {message_id}"
            );
        }

        if !matches!(envelope.kind, MsgType::Response | MsgType::Heartbeat) {
            self.pending.push(Pending {
                message_id,
                to,
                frame: frame.clone(),
                sent_at: Instant::now(),
                resends: 0,
            });
        }

        if tx.send(frame).is_err() {
            debug!("writer to {to} is gone, message {message_id} left to the retry daemon");
        }

        Ok(message_id)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                _ = self.io_cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, from)) => {
                    debug!("accepted connection from {from}");
                    self.io_tasks.spawn(self.clone().read_loop(stream));
                }
                Err(e) => warn!("accept failed: {e}"),
            }
        }
    }

    async fn read_loop(self: Arc<Self>, stream: TcpStream) {
        let (rx, _tx) = stream.into_split();
        let mut rx = FrameReceiver::new(rx);
        let mut buf = Vec::new();

        loop {
            let received = tokio::select! {
                _ = self.io_cancel.cancelled() => break,
                received = rx.recv_into::<Envelope>(&mut buf) => received,
            };

            match received {
                Ok(envelope) => self.dispatch_inbound(envelope),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("peer closed its connection");
                    break;
                }
                Err(e) => {
                    warn!("dropping connection: {e}");
                    break;
                }
            }
        }
    }

    fn dispatch_inbound(self: &Arc<Self>, envelope: Envelope) {
        match envelope.kind {
            MsgType::Response => self.complete(envelope),
            MsgType::Heartbeat => {
                let response = Envelope::response_to(&envelope, self.node_id());
                if let Err(e) = self.send(response, envelope.sender) {
                    debug!("can't answer heartbeat from {}: {e}", envelope.sender);
                }
            }
            kind => {
                let Some(handler) = self.handlers.lock().get(&kind).cloned() else {
                    debug!(
                        "no handler for {kind:?}, dropping message {} from {}",
                        envelope.message_id, envelope.sender
                    );
                    return;
                };

                let this = self.clone();
                self.handler_pool.submit(async move {
                    let mut response = Envelope::response_to(&envelope, this.node_id());
                    handler.handle(&envelope, &mut response).await;

                    let to = response.to;
                    if let Err(e) = this.send(response, to) {
                        warn!("can't answer {kind:?} from {}: {e}", envelope.sender);
                    }
                });
            }
        }
    }

    fn complete(&self, response: Envelope) {
        let message_id = response.message_id;
        self.pending.cancel(message_id);

        // Taken out of the map so a duplicate response finds nothing.
        let Some(callback) = self.callbacks.lock().remove(&message_id) else {
            return;
        };

        self.callback_executor.execute(move || callback(response));
    }

    async fn retry_daemon(self: Arc<Self>) {
        let rtt_timeout = self.config.rtt_timeout();

        loop {
            match self.pending.next(rtt_timeout) {
                Next::Idle => tokio::select! {
                    _ = self.io_cancel.cancelled() => break,
                    _ = self.pending.pushed() => {}
                },
                Next::Wait(remaining) => tokio::select! {
                    _ = self.io_cancel.cancelled() => break,
                    _ = tokio::time::sleep(remaining) => {}
                },
                Next::Resend(entry) => self.resend(entry),
            }
        }
    }

    fn resend(&self, mut entry: Pending) {
        if self
            .config
            .max_resends
            .is_some_and(|max| entry.resends >= max)
        {
            warn!(
                "giving up on message {} to {} after {} resends",
                entry.message_id, entry.to, entry.resends
            );
            self.forget(entry.message_id);
            return;
        }

        entry.resends += 1;
        entry.sent_at = Instant::now();
        warn!(
            message_id = entry.message_id, to = entry.to.0, resends = entry.resends;
            "resending unanswered request"
        );

        match self.peers.lock().get(&entry.to) {
            Some(peer) => {
                let _ = peer.tx.send(entry.frame.clone());
            }
            None => debug!("peer {} is gone, keeping message {}", entry.to, entry.message_id),
        }

        self.pending.requeue(entry);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| since.as_millis() as u64)
}
