use super::{Updater, updater::batch_scale};
use crate::storage::Entry;

/// Delay compensated asynchronous SGD with an adaptive compensation term.
///
/// The compensation is divided by the root of a decaying average of the
/// squared gradients, like RMSProp.
#[derive(Debug)]
pub struct Dcasgda {
    learning_rate: f32,
    scale: f32,
    lambda: f32,
    decay: f32,
    epsilon: f32,
}

impl Dcasgda {
    /// Creates a new `Dcasgda` updater.
    ///
    /// # Arguments
    /// * `learning_rate` - The base step size.
    /// * `batch_size` - The amount of samples each pushed gradient was summed over.
    /// * `lambda` - The weight of the delay compensation.
    /// * `decay` - How much of the squared gradient average is kept per update.
    /// * `epsilon` - Keeps the adaptive denominator away from zero.
    pub fn new(learning_rate: f32, batch_size: usize, lambda: f32, decay: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            scale: batch_scale(batch_size),
            lambda,
            decay,
            epsilon,
        }
    }
}

impl Updater for Dcasgda {
    fn update(&self, entry: &mut Entry, grad: f32, worker: usize) {
        let g = grad * self.scale;
        entry.accum = self.decay * entry.accum + (1. - self.decay) * g * g;

        let drift = entry.value - *entry.shadow_mut(worker);
        let compensation = self.lambda * g * g * drift / (entry.accum + self.epsilon).sqrt();

        entry.value -= self.learning_rate * (g + compensation);
        *entry.shadow_mut(worker) = entry.value;
    }

    fn tensor_step(&self) -> f32 {
        self.learning_rate * self.scale
    }
}
