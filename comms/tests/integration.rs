use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use comms::{
    Buffer, Envelope, MsgType, NodeAddress, NodeId, Role, Transport, TransportConfig,
    TransportErr, membership,
};
use tokio::io;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_config() -> TransportConfig {
    TransportConfig {
        rtt_timeout_ms: 200,
        connect_retries: 0,
        connect_retry_interval_ms: 10,
        handler_threads: 2,
        ..Default::default()
    }
}

async fn pair() -> (Arc<Transport>, Arc<Transport>) {
    let a = Transport::bind(fast_config()).await.unwrap();
    let b = Transport::bind(fast_config()).await.unwrap();
    a.set_node_id(NodeId(10001));
    b.set_node_id(NodeId(1));

    a.register_peer(NodeId(1), b.local_addr()).await.unwrap();
    b.register_peer(NodeId(10001), a.local_addr()).await.unwrap();
    (a, b)
}

#[tokio::test]
async fn send_recv_frame() {
    const SIZE: usize = 128;

    let mut msg = Envelope::new(MsgType::RequestPull, 4);
    msg.sender = NodeId(10002);
    msg.message_id = 17;
    msg.body = comms::codec::encode_keys([1, 2, 3]);

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    tx.send(&msg).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let received: Envelope = rx.recv().await.unwrap();
    assert_eq!(received, msg);
}

#[tokio::test]
async fn oversized_frame_is_rejected() {
    let (one, two) = io::duplex(64);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    tx.send_raw(&u64::MAX.to_be_bytes()).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let err = rx.recv::<Envelope>().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_response_roundtrip() {
    init_logger();
    let (a, b) = pair().await;

    b.register_fn(MsgType::RequestPull, |request, response| {
        assert_eq!(request.sender, NodeId(10001));
        response.body.put_varint(request.epoch * 2);
    });

    let request = Envelope::new(MsgType::RequestPull, 21);
    let mut response = a
        .send_sync(request, NodeId(1), Duration::from_secs(5))
        .await
        .unwrap()
        .expect("no response");

    assert_eq!(response.kind, MsgType::Response);
    assert_eq!(response.sender, NodeId(1));
    assert_eq!(response.body.read_varint().unwrap(), 42);
    assert_eq!(a.outstanding(), 0);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lost_response_is_recovered_by_resend() {
    init_logger();
    let (a, b) = pair().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    b.register_fn(MsgType::RequestPush, move |_, response| {
        // The first answer goes nowhere, as if the network lost it.
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            response.to = NodeId(999);
        }
    });

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let message_id = a
        .send_with(Envelope::new(MsgType::RequestPush, 1), NodeId(1), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(message_id, 1);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert!(calls.load(Ordering::SeqCst) >= 2);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(a.outstanding(), 0);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heartbeat_needs_no_handler() {
    let (a, b) = pair().await;

    let response = a
        .send_sync(
            Envelope::new(MsgType::Heartbeat, 0),
            NodeId(1),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert!(response.is_some_and(|r| r.body.is_empty()));
    // Heartbeats are never queued for resending.
    assert_eq!(a.outstanding(), 0);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unhandled_request_times_out() {
    let (a, b) = pair().await;

    let response = a
        .send_sync(
            Envelope::new(MsgType::RequestInfer, 0),
            NodeId(1),
            Duration::from_millis(300),
        )
        .await
        .unwrap();

    assert!(response.is_none());
    assert_eq!(a.outstanding(), 0);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_peer_and_unreachable() {
    let a = Transport::bind(fast_config()).await.unwrap();

    let err = a
        .send(Envelope::new(MsgType::RequestPull, 0), NodeId(5))
        .unwrap_err();
    assert!(matches!(err, TransportErr::UnknownPeer(NodeId(5))));

    // Bound then dropped, so nothing listens there anymore.
    let gone = Transport::bind(fast_config()).await.unwrap();
    let addr = gone.local_addr();
    gone.shutdown().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = a.register_peer(NodeId(5), addr).await.unwrap_err();
    assert!(matches!(err, TransportErr::Unreachable { .. }));
    assert!(!a.has_peer(NodeId(5)));

    a.shutdown().await;
    a.shutdown().await;
    assert!(a.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[should_panic(expected = "already registered")]
async fn double_handler_registration_panics() {
    let a = Transport::bind(fast_config()).await.unwrap();
    a.register_fn(MsgType::RequestPull, |_, _| {});
    a.register_fn(MsgType::RequestPull, |_, _| {});
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn peers_can_be_replaced_and_deleted() {
    let (a, b) = pair().await;
    let c = Transport::bind(fast_config()).await.unwrap();

    a.register_peer(NodeId(1), c.local_addr()).await.unwrap();
    assert_eq!(a.peer_addr(NodeId(1)), Some(c.local_addr()));

    assert!(a.delete_peer(NodeId(1)));
    assert!(!a.delete_peer(NodeId(1)));
    assert_eq!(a.peer_addr(NodeId(1)), None);

    for t in [a, b, c] {
        t.shutdown().await;
    }
}

/// Plays the master's side of the bootstrap for a single server.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn join_and_leave_through_a_master() {
    init_logger();
    let master = Transport::bind(fast_config()).await.unwrap();
    let node = Transport::bind(fast_config()).await.unwrap();

    let joined = Arc::new(tokio::sync::Notify::new());
    let fins = Arc::new(AtomicUsize::new(0));

    struct Handshake {
        master: Arc<Transport>,
        joined: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl comms::Handler for Handshake {
        async fn handle(&self, request: &Envelope, response: &mut Envelope) {
            let raw = str::from_utf8(request.body.as_bytes()).unwrap();
            let addr: NodeAddress = raw.parse().unwrap();
            assert_eq!(request.sender, NodeId::SERVER_PLACEHOLDER);

            self.master.register_peer(NodeId(1), addr).await.unwrap();
            response.to = NodeId(1);
            response.body.put_varint(1);
            self.joined.notify_one();
        }
    }

    master.register_handler(
        MsgType::RequestHandshake,
        Handshake {
            master: master.clone(),
            joined: joined.clone(),
        },
    );

    let counter = fins.clone();
    master.register_fn(MsgType::RequestFin, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let join = {
        let node = node.clone();
        let master_addr = master.local_addr();
        tokio::spawn(async move { comms::join_cluster(&node, Role::Server, master_addr).await })
    };

    joined.notified().await;

    // A node finds itself in the list when it's a ring worker, it's never connected to.
    let ack = Envelope::with_body(
        MsgType::RequestAck,
        0,
        membership::encode_address_list(&[node.local_addr()]),
    );
    let response = master
        .send_sync(ack, NodeId(1), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(response.is_some());

    let view = join.await.unwrap().unwrap();
    assert_eq!(view.node_id, NodeId(1));
    assert_eq!(node.node_id(), NodeId(1));
    assert_eq!(view.peers, [(NodeId(10001), node.local_addr())]);

    comms::leave_cluster(&node).await.unwrap();
    assert_eq!(fins.load(Ordering::SeqCst), 1);

    node.shutdown().await;
    master.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_registration() {
    let master = Transport::bind(fast_config()).await.unwrap();
    let node = Transport::bind(fast_config()).await.unwrap();

    let master_handle = master.clone();
    master.register_handler(MsgType::RequestHandshake, Refuse(master_handle));

    struct Refuse(Arc<Transport>);

    #[async_trait::async_trait]
    impl comms::Handler for Refuse {
        async fn handle(&self, request: &Envelope, response: &mut Envelope) {
            let addr: NodeAddress = str::from_utf8(request.body.as_bytes())
                .unwrap()
                .parse()
                .unwrap();
            self.0.register_peer(NodeId(77), addr).await.unwrap();
            response.to = NodeId(77);
            response.body = Buffer::new();
        }
    }

    let err = comms::join_cluster(&node, Role::Worker, master.local_addr())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportErr::Refused));

    node.shutdown().await;
    master.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handler_running_at_shutdown_still_answers() {
    init_logger();
    let (a, b) = pair().await;

    struct SlowFin(Arc<comms::sync::Barrier>);

    #[async_trait::async_trait]
    impl comms::Handler for SlowFin {
        async fn handle(&self, _: &Envelope, response: &mut Envelope) {
            self.0.unblock();
            tokio::time::sleep(Duration::from_millis(50)).await;
            response.body.put_varint(7);
        }
    }

    let fin = Arc::new(comms::sync::Barrier::new(1));
    b.register_handler(MsgType::RequestFin, SlowFin(fin.clone()));

    let closing = {
        let b = b.clone();
        tokio::spawn(async move {
            fin.block().await;
            b.shutdown().await;
        })
    };

    let mut response = a
        .send_sync(
            Envelope::new(MsgType::RequestFin, 0),
            NodeId(1),
            Duration::from_secs(3),
        )
        .await
        .unwrap()
        .expect("the FIN was never answered");
    assert_eq!(response.body.read_varint().unwrap(), 7);

    closing.await.unwrap();
    assert!(b.is_closed());
    assert!(matches!(
        b.send(Envelope::new(MsgType::RequestPull, 0), NodeId(10001)),
        Err(TransportErr::Shutdown)
    ));

    a.shutdown().await;
}
