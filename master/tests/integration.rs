use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use comms::{
    ClusterConfig, NodeAddress, NodeId, Role, RunMode, Transport, TransportConfig, TransportErr,
};
use master::{HeartbeatConfig, LinkState, Master, MasterErr};

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

fn cluster(ps_count: usize, worker_count: usize, mode: RunMode) -> ClusterConfig {
    ClusterConfig {
        master_addr: NodeAddress::new([127, 0, 0, 1], 0),
        ps_count,
        worker_count,
        mode,
    }
}

async fn start(master: Master) -> (Arc<Master>, tokio::task::JoinHandle<master::Result<()>>) {
    let master = Arc::new(master);
    let runner = {
        let master = master.clone();
        tokio::spawn(async move { master.run().await })
    };
    (master, runner)
}

fn spawn_join(
    role: Role,
    master_addr: NodeAddress,
) -> tokio::task::JoinHandle<(Arc<Transport>, comms::Result<comms::ClusterView>)> {
    tokio::spawn(async move {
        let transport = Transport::bind(fast_config()).await.unwrap();
        let view = comms::join_cluster(&transport, role, master_addr).await;
        (transport, view)
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parameter_server_bootstrap_and_shutdown() {
    init_logger();
    let master = Master::bind(cluster(1, 2, RunMode::ParameterServer), fast_config())
        .await
        .unwrap();
    let addr = master.local_addr();
    let (master, runner) = start(master).await;

    let server = Transport::bind(fast_config()).await.unwrap();
    let stops = Arc::new(AtomicUsize::new(0));
    let counter = stops.clone();
    server.register_fn(comms::MsgType::RequestFin, move |request, _| {
        assert!(request.sender.is_master());
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let server_join = {
        let server = server.clone();
        tokio::spawn(async move { comms::join_cluster(&server, Role::Server, addr).await })
    };
    let workers = [spawn_join(Role::Worker, addr), spawn_join(Role::Worker, addr)];

    let server_view = server_join.await.unwrap().unwrap();
    assert_eq!(server_view.node_id, NodeId(1));

    let listed: HashSet<_> = server_view.peers.iter().map(|(id, _)| *id).collect();
    assert_eq!(listed, HashSet::from([NodeId(10001), NodeId(10002)]));

    let mut joined = Vec::new();
    for worker in workers {
        let (transport, view) = worker.await.unwrap();
        let view = view.unwrap();
        assert_eq!(view.peers, [(NodeId(1), server.local_addr())]);
        assert!(transport.has_peer(NodeId(1)));
        joined.push((transport, view));
    }

    let ranks: HashSet<_> = joined.iter().map(|(_, view)| view.rank()).collect();
    assert_eq!(ranks, HashSet::from([Some(0), Some(1)]));
    assert_eq!(master.link_state(NodeId(1)), Some(LinkState::Alive));

    for (transport, view) in &joined {
        comms::leave_cluster(transport).await.unwrap();
        assert_eq!(master.link_state(view.node_id), None);
    }

    runner.await.unwrap().unwrap();
    assert_eq!(stops.load(Ordering::SeqCst), 1);

    for (transport, _) in joined {
        transport.shutdown().await;
    }
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn extra_nodes_are_refused() {
    init_logger();
    let master = Master::bind(cluster(0, 1, RunMode::Ring), fast_config())
        .await
        .unwrap();
    let addr = master.local_addr();
    let (_master, runner) = start(master).await;

    let (first, view) = spawn_join(Role::RingWorker, addr).await.unwrap();
    let view = view.unwrap();
    assert_eq!(view.node_id, NodeId(10001));
    assert_eq!(view.peers, [(NodeId(10001), first.local_addr())]);

    let (second, refused) = spawn_join(Role::RingWorker, addr).await.unwrap();
    assert!(matches!(refused, Err(TransportErr::Refused)));

    comms::leave_cluster(&first).await.unwrap();
    runner.await.unwrap().unwrap();

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn silent_server_is_declared_dead() {
    init_logger();
    let heartbeat = HeartbeatConfig {
        probe_interval_ms: 50,
        unroutable_after_ms: 300,
        dead_after_ms: 600,
    };

    let master = Master::bind(cluster(1, 1, RunMode::ParameterServer), fast_config())
        .await
        .unwrap()
        .with_heartbeat(heartbeat);
    let addr = master.local_addr();
    let (master, runner) = start(master).await;

    let server = spawn_join(Role::Server, addr);
    let worker = spawn_join(Role::Worker, addr);
    let (server, server_view) = server.await.unwrap();
    let (worker, _) = worker.await.unwrap();
    assert!(server_view.is_ok());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(master.link_state(NodeId(1)), Some(LinkState::Alive));

    server.shutdown().await;

    let mut state = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        state = master.link_state(NodeId(1));
        if state == Some(LinkState::Dead) {
            break;
        }
    }
    assert_eq!(state, Some(LinkState::Dead));

    // The dead server is skipped when stopping the cluster.
    comms::leave_cluster(&worker).await.unwrap();
    runner.await.unwrap().unwrap();
    worker.shutdown().await;
}

#[tokio::test]
async fn invalid_cluster_shape_is_rejected() {
    let err = Master::bind(cluster(0, 2, RunMode::ParameterServer), fast_config())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, MasterErr::InvalidConfig(_)));
}
