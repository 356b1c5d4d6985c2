use std::{error::Error, fmt};

use comms::TransportErr;

/// The parameter server module's result type.
pub type Result<T> = std::result::Result<T, ServerErr>;

/// Parameter server runtime failures.
#[derive(Debug)]
pub enum ServerErr {
    Transport(TransportErr),
}

impl fmt::Display for ServerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerErr::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl Error for ServerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ServerErr::Transport(e) => Some(e),
        }
    }
}

impl From<TransportErr> for ServerErr {
    fn from(value: TransportErr) -> Self {
        Self::Transport(value)
    }
}
