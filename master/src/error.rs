use std::{fmt, io};

use comms::TransportErr;

/// The master module's result type.
pub type Result<T> = std::result::Result<T, MasterErr>;

/// All errors that can occur while coordinating the cluster.
#[derive(Debug)]
pub enum MasterErr {
    /// Invalid cluster configuration, caught before listening.
    InvalidConfig(String),
    Transport(TransportErr),
}

impl fmt::Display for MasterErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid cluster config: {msg}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for MasterErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::InvalidConfig(_) => None,
        }
    }
}

impl From<TransportErr> for MasterErr {
    fn from(e: TransportErr) -> Self {
        Self::Transport(e)
    }
}

impl From<MasterErr> for io::Error {
    fn from(e: MasterErr) -> Self {
        match e {
            MasterErr::Transport(e) => e.into(),
            MasterErr::InvalidConfig(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
        }
    }
}
