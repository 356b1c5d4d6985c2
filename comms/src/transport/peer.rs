//! Outbound channels: one connection and one writer task per peer.

use std::{sync::Arc, time::Duration};

use log::{debug, error, warn};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_util::sync::CancellationToken;

use crate::{FrameSender, NodeAddress, NodeId, Result, TransportErr, TransportConfig};

/// The outbound half of a registered peer.
#[derive(Debug)]
pub(super) struct Peer {
    pub addr: NodeAddress,
    pub tx: mpsc::UnboundedSender<Arc<[u8]>>,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct RetryPolicy {
    retries: u32,
    interval: Duration,
}

impl From<&TransportConfig> for RetryPolicy {
    fn from(config: &TransportConfig) -> Self {
        Self {
            retries: config.connect_retries,
            interval: config.connect_retry_interval(),
        }
    }
}

/// Connects to `addr`, retrying `policy.retries` times before giving up.
///
/// # Returns
/// `TransportErr::Unreachable` carrying the last failure.
pub(super) async fn connect(addr: NodeAddress, policy: RetryPolicy) -> Result<TcpStream> {
    let mut attempt = 0;

    loop {
        match TcpStream::connect(addr.socket_addr()).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                warn!("connect to {addr} failed ({e}), retry {attempt}/{}", policy.retries);
                tokio::time::sleep(policy.interval).await;
            }
            Err(source) => return Err(TransportErr::Unreachable { addr, source }),
        }
    }
}

/// Writes every queued frame to the peer until the channel closes.
///
/// A failed write reconnects once with the retry policy. A frame that still
/// can't be written is dropped, the retry daemon resends requests.
pub(super) async fn write_loop(
    id: NodeId,
    addr: NodeAddress,
    stream: TcpStream,
    mut rx: mpsc::UnboundedReceiver<Arc<[u8]>>,
    policy: RetryPolicy,
    cancel: CancellationToken,
) {
    let mut sender = FrameSender::new(stream);

    while let Some(frame) = rx.recv().await {
        let Err(e) = sender.send_raw(&frame).await else {
            continue;
        };

        warn!(peer = id.0; "write to {addr} failed ({e}), reconnecting");

        let reconnected = tokio::select! {
            _ = cancel.cancelled() => return,
            res = connect(addr, policy) => res,
        };

        match reconnected {
            Ok(stream) => {
                sender = FrameSender::new(stream);
                if let Err(e) = sender.send_raw(&frame).await {
                    error!(peer = id.0; "dropping frame for {addr}: {e}");
                }
            }
            Err(e) => error!(peer = id.0; "dropping frame: {e}"),
        }
    }

    debug!(peer = id.0; "writer to {addr} closed");
}
