use std::sync::Arc;

use comms::{Buffer, Envelope, MsgType, NodeId, Transport, sync::Barrier};
use parking_lot::Mutex;

use crate::{ConsistentHash, Result};

/// What the pull and push clients share: the transport and the key placement.
pub struct Context {
    pub transport: Arc<Transport>,
    pub hash: ConsistentHash,
}

impl Context {
    pub fn new(transport: Arc<Transport>, hash: ConsistentHash) -> Self {
        Self { transport, hash }
    }

    /// Sends one request per shard and waits for all of their responses.
    ///
    /// # Arguments
    /// * `kind` - The request kind.
    /// * `epoch` - The caller's epoch, stamped on every request.
    /// * `requests` - The body to send to each server.
    ///
    /// # Returns
    /// The responses in arrival order.
    pub async fn fan_out(
        &self,
        kind: MsgType,
        epoch: u64,
        requests: Vec<(NodeId, Buffer)>,
    ) -> Result<Vec<Envelope>> {
        let barrier = Arc::new(Barrier::new(requests.len()));
        let responses = Arc::new(Mutex::new(Vec::with_capacity(requests.len())));

        for (to, body) in requests {
            let barrier = barrier.clone();
            let responses = responses.clone();

            self.transport
                .send_with(Envelope::with_body(kind, epoch, body), to, move |response| {
                    responses.lock().push(response);
                    barrier.unblock();
                })?;
        }

        barrier.block().await;

        let responses = std::mem::take(&mut *responses.lock());
        Ok(responses)
    }
}
