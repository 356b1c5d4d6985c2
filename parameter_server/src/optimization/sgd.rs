use super::{Updater, updater::batch_scale};
use crate::storage::Entry;

/// Plain stochastic gradient descent.
#[derive(Debug)]
pub struct Sgd {
    learning_rate: f32,
    scale: f32,
}

impl Sgd {
    /// Creates a new `Sgd` updater.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `batch_size` - The amount of samples each pushed gradient was summed over.
    ///
    /// # Returns
    /// A new `Sgd` instance.
    pub fn new(learning_rate: f32, batch_size: usize) -> Self {
        Self {
            learning_rate,
            scale: batch_scale(batch_size),
        }
    }
}

impl Updater for Sgd {
    fn update(&self, entry: &mut Entry, grad: f32, _worker: usize) {
        entry.value -= grad * self.scale * self.learning_rate;
    }

    fn tensor_step(&self) -> f32 {
        self.learning_rate * self.scale
    }
}
