use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use comms::{Envelope, Handler, sync::Barrier};
use log::{info, warn};

use super::ServerState;

/// Serves `REQUEST_PULL`.
pub(super) struct PullHandler(pub Arc<ServerState>);

#[async_trait::async_trait]
impl Handler for PullHandler {
    async fn handle(&self, request: &Envelope, response: &mut Envelope) {
        // Table locks block.
        let pulled =
            tokio::task::block_in_place(|| self.0.pull(request.body.clone(), request.epoch));

        match pulled {
            Ok(body) => response.body = body,
            Err(e) => warn!("malformed pull from {}: {e}", request.sender),
        }
    }
}

/// Serves `REQUEST_PUSH`, the response carries no payload.
pub(super) struct PushHandler(pub Arc<ServerState>);

#[async_trait::async_trait]
impl Handler for PushHandler {
    async fn handle(&self, request: &Envelope, _response: &mut Envelope) {
        let worker = request.sender.worker_rank().unwrap_or_default();
        let pushed = tokio::task::block_in_place(|| {
            self.0.push(request.body.clone(), request.epoch, worker)
        });

        if let Err(e) = pushed {
            warn!("malformed push from {}: {e}", request.sender);
        }
    }
}

/// Serves the master's `REQUEST_FIN`, releasing the serving loop once.
pub(super) struct FinHandler {
    pub received: AtomicBool,
    pub barrier: Arc<Barrier>,
}

#[async_trait::async_trait]
impl Handler for FinHandler {
    async fn handle(&self, request: &Envelope, _response: &mut Envelope) {
        if self.received.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("training finished, FIN received from {}", request.sender);
        self.barrier.unblock();
    }
}
