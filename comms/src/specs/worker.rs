use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::MagnitudeFilter;

/// The specification for a parameter server mode worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSpec {
    /// Gradients outside this window are not pushed.
    pub push_filter: MagnitudeFilter,
    /// Pause before retrying a pull a server deferred.
    pub pull_retry_delay_ms: u64,
}

impl Default for WorkerSpec {
    fn default() -> Self {
        Self {
            push_filter: MagnitudeFilter::default(),
            pull_retry_delay_ms: 100,
        }
    }
}

impl WorkerSpec {
    pub fn pull_retry_delay(&self) -> Duration {
        Duration::from_millis(self.pull_retry_delay_ms)
    }
}

/// The specification for a ring mode worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingSpec {
    /// Resend a segment if its hop isn't acknowledged within this.
    pub hop_timeout_ms: u64,
    /// Scale the reduced vector by the ring size.
    pub average: bool,
}

impl Default for RingSpec {
    fn default() -> Self {
        Self {
            hop_timeout_ms: 500,
            average: false,
        }
    }
}

impl RingSpec {
    pub fn hop_timeout(&self) -> Duration {
        Duration::from_millis(self.hop_timeout_ms)
    }
}
