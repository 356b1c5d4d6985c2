use std::{error::Error, fmt, io};

use crate::{AddrParseErr, NodeAddress, NodeId};

/// The comms module's result type.
pub type Result<T> = std::result::Result<T, TransportErr>;

/// Transport and membership failures.
#[derive(Debug)]
pub enum TransportErr {
    Io(io::Error),
    /// Every connect attempt to a peer failed.
    Unreachable {
        addr: NodeAddress,
        source: io::Error,
    },
    /// No outbound channel is registered for the destination.
    UnknownPeer(NodeId),
    /// The listen socket is not an IPv4 endpoint.
    Address(AddrParseErr),
    /// The master refused the registration, the cluster is already full.
    Refused,
    /// The transport was shut down while the operation was pending.
    Shutdown,
}

impl fmt::Display for TransportErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErr::Io(e) => write!(f, "io error: {e}"),
            TransportErr::Unreachable { addr, source } => {
                write!(f, "peer {addr} is unreachable: {source}")
            }
            TransportErr::UnknownPeer(id) => write!(f, "no peer registered with id {id}"),
            TransportErr::Address(e) => write!(f, "{e}"),
            TransportErr::Refused => write!(f, "registration refused by the master"),
            TransportErr::Shutdown => write!(f, "transport is shut down"),
        }
    }
}

impl Error for TransportErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TransportErr::Io(e) => Some(e),
            TransportErr::Unreachable { source, .. } => Some(source),
            TransportErr::Address(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<AddrParseErr> for TransportErr {
    fn from(value: AddrParseErr) -> Self {
        Self::Address(value)
    }
}

/// Boundary conversion for I/O APIs.
impl From<TransportErr> for io::Error {
    fn from(value: TransportErr) -> Self {
        match value {
            TransportErr::Io(e) => e,
            TransportErr::Unreachable { source, .. } => source,
            other => io::Error::other(other),
        }
    }
}
