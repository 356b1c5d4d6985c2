//! Wire protocol, transport and cluster membership shared by every node.

mod address;
mod buffer;
pub mod codec;
pub mod config;
mod error;
pub mod membership;
mod msg;
mod receiver;
mod sender;
pub mod specs;
pub mod sync;
mod transport;

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

pub use address::{AddrParseErr, BEGIN_ID_OF_PS, BEGIN_ID_OF_WORKER, NodeAddress, NodeId};
pub use buffer::{Buffer, F16_SIZE};
pub use codec::{MagnitudeFilter, Tag, Tensor};
pub use config::{ClusterConfig, RunMode, TransportConfig};
pub use error::{Result, TransportErr};
pub use membership::{ClusterView, Role, join_cluster, leave_cluster};
pub use msg::{ENVELOPE_HEADER_SIZE, Envelope, MsgType};
pub use receiver::FrameReceiver;
pub use sender::{FrameSender, encode_frame};
pub use transport::{Handler, Transport};

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Frames announcing more than this are rejected before allocating.
const MAX_FRAME_LEN: LenType = 1 << 30;

/// Encodes an object into the bytes following the frame length.
pub trait Serialize {
    fn serialize(&self, buf: &mut Vec<u8>);
}

/// Decodes an object from a whole frame, length excluded.
pub trait Deserialize: Sized {
    fn deserialize(buf: &[u8]) -> io::Result<Self>;
}

/// Creates both `FrameReceiver` and `FrameSender` network channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of a frame receiver and sender.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}
