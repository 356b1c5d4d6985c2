//! Liveness probing of registered nodes.
//!
//! The master probes every node with a HEARTBEAT and tracks the age of the
//! last answer. Detection only updates the master's bookkeeping, dead nodes
//! are never replaced.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use comms::{Envelope, MsgType, NodeId, Transport};
use log::{debug, error, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Probe timing of the heartbeat monitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub probe_interval_ms: u64,
    /// Silence after which a node is considered unroutable.
    pub unroutable_after_ms: u64,
    /// Silence after which a node is considered dead and dropped.
    pub dead_after_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 5_000,
            unroutable_after_ms: 30_000,
            dead_after_ms: 40_000,
        }
    }
}

impl HeartbeatConfig {
    pub fn from_json(raw: &str) -> std::io::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Classifies a node by how long ago it last answered.
    pub fn check_alive(&self, silence: Duration) -> LinkState {
        if silence >= Duration::from_millis(self.dead_after_ms) {
            LinkState::Dead
        } else if silence >= Duration::from_millis(self.unroutable_after_ms) {
            LinkState::Unroutable
        } else {
            LinkState::Alive
        }
    }
}

/// What the master believes about a node's link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Alive,
    /// Silent for a while, probed less often.
    Unroutable,
    /// Silent for too long, its peer channel was dropped.
    Dead,
}

#[derive(Debug)]
struct Link {
    last_seen: Instant,
    state: LinkState,
}

/// The link state of every monitored node.
#[derive(Debug, Default)]
pub struct LinkTable {
    links: Mutex<HashMap<NodeId, Link>>,
}

impl LinkTable {
    /// Starts tracking `id` as alive.
    pub fn insert(&self, id: NodeId) {
        self.links.lock().insert(
            id,
            Link {
                last_seen: Instant::now(),
                state: LinkState::Alive,
            },
        );
    }

    /// Stops tracking `id`, its monitor exits on its next probe.
    pub fn retire(&self, id: NodeId) -> bool {
        self.links.lock().remove(&id).is_some()
    }

    pub fn state(&self, id: NodeId) -> Option<LinkState> {
        self.links.lock().get(&id).map(|link| link.state)
    }

    fn touch(&self, id: NodeId) {
        if let Some(link) = self.links.lock().get_mut(&id) {
            link.last_seen = Instant::now();
        }
    }

    /// Reclassifies `id` from its silence, `None` once retired.
    fn refresh(&self, id: NodeId, config: &HeartbeatConfig) -> Option<LinkState> {
        let mut links = self.links.lock();
        let link = links.get_mut(&id)?;
        link.state = config.check_alive(link.last_seen.elapsed());
        Some(link.state)
    }
}

/// Probes `id` until it dies, is retired or `cancel` fires.
pub async fn monitor(
    transport: Arc<Transport>,
    links: Arc<LinkTable>,
    id: NodeId,
    config: HeartbeatConfig,
    cancel: CancellationToken,
) {
    let mut interval = config.probe_interval();
    let mut last_probe = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        if let Some(previous) = last_probe.take() {
            transport.forget(previous);
        }

        let Some(state) = links.refresh(id, &config) else {
            debug!("stopped monitoring node {id}");
            return;
        };

        match state {
            LinkState::Alive => interval = config.probe_interval(),
            LinkState::Unroutable => {
                warn!(node = id.0; "node {id} is unroutable, slowing down its probes");
                interval = config.probe_interval() * 2;
            }
            LinkState::Dead => {
                error!(node = id.0; "node {id} is dead, dropping its channel");
                transport.delete_peer(id);
                return;
            }
        }

        let seen = links.clone();
        let probe = transport.send_with(Envelope::new(MsgType::Heartbeat, 0), id, move |_| {
            seen.touch(id)
        });

        match probe {
            Ok(message_id) => last_probe = Some(message_id),
            Err(e) => {
                debug!("stopped monitoring node {id}: {e}");
                return;
            }
        }
    }
}
