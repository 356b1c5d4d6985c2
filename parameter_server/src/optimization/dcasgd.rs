use super::{Updater, updater::batch_scale};
use crate::storage::Entry;

/// Delay compensated asynchronous SGD.
///
/// Corrects a stale gradient with the drift of the value since the pushing
/// worker last touched it: `g + λ·g²·(v - shadow)`.
#[derive(Debug)]
pub struct Dcasgd {
    learning_rate: f32,
    scale: f32,
    lambda: f32,
}

impl Dcasgd {
    pub fn new(learning_rate: f32, batch_size: usize, lambda: f32) -> Self {
        Self {
            learning_rate,
            scale: batch_scale(batch_size),
            lambda,
        }
    }
}

impl Updater for Dcasgd {
    fn update(&self, entry: &mut Entry, grad: f32, worker: usize) {
        let g = grad * self.scale;
        let drift = entry.value - *entry.shadow_mut(worker);

        entry.value -= self.learning_rate * (g + self.lambda * g * g * drift);
        *entry.shadow_mut(worker) = entry.value;
    }

    fn tensor_step(&self) -> f32 {
        self.learning_rate * self.scale
    }
}
