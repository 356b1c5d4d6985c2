use serde::{Deserialize, Serialize};

use crate::MagnitudeFilter;

/// The specification for the `Updater` trait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdaterSpec {
    Sgd {
        learning_rate: f32,
        batch_size: usize,
    },
    Adagrad {
        learning_rate: f32,
        batch_size: usize,
        epsilon: f32,
    },
    Dcasgd {
        learning_rate: f32,
        batch_size: usize,
        lambda: f32,
    },
    Dcasgda {
        learning_rate: f32,
        batch_size: usize,
        lambda: f32,
        decay: f32,
        epsilon: f32,
    },
}

impl Default for UpdaterSpec {
    fn default() -> Self {
        UpdaterSpec::Sgd {
            learning_rate: 0.1,
            batch_size: 1,
        }
    }
}

/// The specification for a parameter server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSpec {
    pub updater: UpdaterSpec,
    /// Push batches trailing the newest epoch by more than this are dropped.
    pub staleness_threshold: u64,
    /// Values outside this window are left out of pull responses.
    pub pull_filter: MagnitudeFilter,
}

impl Default for ServerSpec {
    fn default() -> Self {
        Self {
            updater: UpdaterSpec::default(),
            staleness_threshold: 10,
            pull_filter: MagnitudeFilter::default(),
        }
    }
}
