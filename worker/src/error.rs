use std::{error::Error, fmt, io};

use comms::{NodeId, TransportErr};

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Transport(TransportErr),
    /// A response body didn't have the layout of its request.
    UnexpectedBody {
        from: NodeId,
        step: u64,
        got: &'static str,
    },
    /// A tensor response addressed values outside the local arena.
    TensorOutOfRange {
        offset: u64,
        len: usize,
        size: usize,
    },
    /// The cluster has no node to exchange parameters with.
    EmptyCluster,
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Transport(e) => write!(f, "transport error: {e}"),
            WorkerErr::UnexpectedBody { from, step, got } => {
                write!(f, "unexpected body from {from} at step {step}: got {got}")
            }
            WorkerErr::TensorOutOfRange { offset, len, size } => write!(
                f,
                "tensor {offset}..{} doesn't fit the arena of size {size}",
                *offset as usize + len
            ),
            WorkerErr::EmptyCluster => write!(f, "the cluster has no peers to exchange with"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<TransportErr> for WorkerErr {
    fn from(value: TransportErr) -> Self {
        Self::Transport(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
