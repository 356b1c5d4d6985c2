use std::io;

use crate::{Buffer, Deserialize, NodeId, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

/// The size in bytes of the fixed envelope header.
pub const ENVELOPE_HEADER_SIZE: usize = HEADER_SIZE + 8 + 4 + 8 + 8 + 4;

/// The kind of an `Envelope`, the first field of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Response,
    RequestHandshake,
    RequestAck,
    RequestFin,
    RequestPush,
    RequestPull,
    RequestInfer,
    Heartbeat,
}

impl MsgType {
    pub fn code(self) -> Header {
        match self {
            MsgType::Response => 0,
            MsgType::RequestHandshake => 1,
            MsgType::RequestAck => 2,
            MsgType::RequestFin => 3,
            MsgType::RequestPush => 4,
            MsgType::RequestPull => 5,
            MsgType::RequestInfer => 6,
            MsgType::Heartbeat => 7,
        }
    }

    pub fn from_code(code: Header) -> io::Result<Self> {
        let kind = match code {
            0 => MsgType::Response,
            1 => MsgType::RequestHandshake,
            2 => MsgType::RequestAck,
            3 => MsgType::RequestFin,
            4 => MsgType::RequestPush,
            5 => MsgType::RequestPull,
            6 => MsgType::RequestInfer,
            7 => MsgType::Heartbeat,
            code => return Envelope::invalid_kind(code),
        };

        Ok(kind)
    }

    pub fn is_request(self) -> bool {
        self != MsgType::Response
    }
}

/// The application layer message for the entire system.
///
/// A fixed big endian header followed by an opaque body.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: MsgType,
    /// The training epoch of the sender, or a ring step.
    pub epoch: u64,
    pub sender: NodeId,
    /// Unique per sender, echoed by the response to its request.
    pub message_id: u64,
    /// Milliseconds since the unix epoch, stamped when the message leaves.
    pub send_time_ms: u64,
    pub to: NodeId,
    pub body: Buffer,
}

impl Envelope {
    /// Creates a new `Envelope` with an empty body.
    ///
    /// # Arguments
    /// * `kind` - The kind of the message.
    /// * `epoch` - The epoch of the sender.
    pub fn new(kind: MsgType, epoch: u64) -> Self {
        Self {
            kind,
            epoch,
            sender: NodeId::default(),
            message_id: 0,
            send_time_ms: 0,
            to: NodeId::default(),
            body: Buffer::new(),
        }
    }

    /// Creates a new request carrying `body`.
    pub fn with_body(kind: MsgType, epoch: u64, body: Buffer) -> Self {
        Self {
            body,
            ..Self::new(kind, epoch)
        }
    }

    /// Creates the response skeleton for `request`.
    ///
    /// The response is addressed to the request's sender and echoes its message id.
    pub fn response_to(request: &Envelope, local: NodeId) -> Self {
        Self {
            kind: MsgType::Response,
            epoch: request.epoch,
            sender: local,
            message_id: request.message_id,
            send_time_ms: 0,
            to: request.sender,
            body: Buffer::new(),
        }
    }

    /// The whole encoded size of this envelope, without the frame prefix.
    pub fn encoded_len(&self) -> usize {
        ENVELOPE_HEADER_SIZE + self.body.len()
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "The given buffer is too small {size}, must at least be {ENVELOPE_HEADER_SIZE} bytes"
            ),
        ))
    }

    fn invalid_kind<T>(code: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid message kind {code}"),
        ))
    }
}

impl Serialize for Envelope {
    fn serialize(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.encoded_len());
        buf.extend_from_slice(&self.kind.code().to_be_bytes());
        buf.extend_from_slice(&self.epoch.to_be_bytes());
        buf.extend_from_slice(&self.sender.0.to_be_bytes());
        buf.extend_from_slice(&self.message_id.to_be_bytes());
        buf.extend_from_slice(&self.send_time_ms.to_be_bytes());
        buf.extend_from_slice(&self.to.0.to_be_bytes());
        buf.extend_from_slice(self.body.as_bytes());
    }
}

impl Deserialize for Envelope {
    fn deserialize(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < ENVELOPE_HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (header, body) = buf.split_at(ENVELOPE_HEADER_SIZE);
        let mut fields = HeaderReader(header);

        let kind = MsgType::from_code(fields.u32())?;
        let epoch = fields.u64();
        let sender = NodeId(fields.u32());
        let message_id = fields.u64();
        let send_time_ms = fields.u64();
        let to = NodeId(fields.u32());

        Ok(Self {
            kind,
            epoch,
            sender,
            message_id,
            send_time_ms,
            to,
            body: Buffer::from(body),
        })
    }
}

/// Walks a header already checked to be `ENVELOPE_HEADER_SIZE` long.
struct HeaderReader<'a>(&'a [u8]);

impl HeaderReader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let (head, rest) = self.0.split_at(N);
        self.0 = rest;

        let mut bytes = [0; N];
        bytes.copy_from_slice(head);
        bytes
    }

    fn u32(&mut self) -> u32 {
        u32::from_be_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_be_bytes(self.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_big_endian() {
        let mut env = Envelope::new(MsgType::RequestPush, 3);
        env.sender = NodeId(10001);
        env.message_id = 42;
        env.to = NodeId(1);
        env.body.put_u8(b'N');

        let mut buf = Vec::new();
        env.serialize(&mut buf);

        assert_eq!(buf.len(), ENVELOPE_HEADER_SIZE + 1);
        assert_eq!(&buf[..4], &[0, 0, 0, 4]);
        assert_eq!(&buf[4..12], &3u64.to_be_bytes());
        assert_eq!(&buf[12..16], &10001u32.to_be_bytes());

        let decoded = Envelope::deserialize(&buf).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_short_or_unknown_header() {
        assert!(Envelope::deserialize(&[0; 10]).is_err());

        let mut buf = Vec::new();
        Envelope::new(MsgType::Heartbeat, 0).serialize(&mut buf);
        buf[3] = 99;
        assert!(Envelope::deserialize(&buf).is_err());
    }

    #[test]
    fn test_response_echoes_request() {
        let mut req = Envelope::new(MsgType::RequestPull, 5);
        req.sender = NodeId(10002);
        req.message_id = 9;

        let resp = Envelope::response_to(&req, NodeId(1));
        assert_eq!(resp.kind, MsgType::Response);
        assert_eq!(resp.to, NodeId(10002));
        assert_eq!(resp.message_id, 9);
        assert_eq!(resp.sender, NodeId(1));
    }
}
