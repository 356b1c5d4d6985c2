use super::{Updater, updater::batch_scale};
use crate::storage::Entry;

#[derive(Debug)]
pub struct Adagrad {
    learning_rate: f32,
    scale: f32,
    epsilon: f32,
}

impl Adagrad {
    /// Creates a new `Adagrad` updater.
    ///
    /// # Arguments
    /// * `learning_rate` - The base step size.
    /// * `batch_size` - The amount of samples each pushed gradient was summed over.
    /// * `epsilon` - Keeps the adaptive denominator away from zero.
    pub fn new(learning_rate: f32, batch_size: usize, epsilon: f32) -> Self {
        Self {
            learning_rate,
            scale: batch_scale(batch_size),
            epsilon,
        }
    }
}

impl Updater for Adagrad {
    fn update(&self, entry: &mut Entry, grad: f32, _worker: usize) {
        let g = grad * self.scale;
        entry.accum += g * g;
        entry.value -= g * self.learning_rate / (entry.accum + self.epsilon).sqrt();
    }

    fn tensor_step(&self) -> f32 {
        self.learning_rate * self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adagrad_shrinks_steps() {
        let adagrad = Adagrad::new(1.0, 1, 1e-8);
        let mut entry = Entry::new(0.0);

        adagrad.update(&mut entry, 2.0, 0);
        let first = entry.value;
        assert!((first + 1.0).abs() < 1e-4);

        adagrad.update(&mut entry, 2.0, 0);
        let second = entry.value - first;
        assert!(second.abs() < 1.0);
        assert!((entry.accum - 8.0).abs() < 1e-6);
    }
}
