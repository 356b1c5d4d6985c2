//! The sending end of the length prefixed framing.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, Serialize};

/// The sending end handle of a connection.
pub struct FrameSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    /// Creates a new `FrameSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Serializes `msg` into a single frame and writes it.
    ///
    /// # Arguments
    /// * `msg` - A serializable object.
    ///
    /// # Returns
    /// A result object that returns `io::Error` on failure.
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> io::Result<()> {
        let Self { buf, tx } = self;

        buf.clear();
        buf.resize(LEN_TYPE_SIZE, 0);
        msg.serialize(buf);

        let len = buf.len() - LEN_TYPE_SIZE;
        let header = (len as LenType).to_be_bytes();
        buf[..header.len()].copy_from_slice(&header);

        tx.write_all(buf).await?;
        tx.flush().await
    }

    /// Writes an already framed buffer as is.
    pub async fn send_raw(&mut self, frame: &[u8]) -> io::Result<()> {
        self.tx.write_all(frame).await?;
        self.tx.flush().await
    }
}

/// Serializes `msg` into a complete frame, length prefix included.
pub fn encode_frame<T: Serialize>(msg: &T) -> Vec<u8> {
    let mut buf = vec![0; LEN_TYPE_SIZE];
    msg.serialize(&mut buf);

    let len = (buf.len() - LEN_TYPE_SIZE) as LenType;
    buf[..LEN_TYPE_SIZE].copy_from_slice(&len.to_be_bytes());
    buf
}
