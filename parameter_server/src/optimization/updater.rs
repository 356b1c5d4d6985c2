use crate::storage::Entry;

/// Defines the strategy for updating a parameter from an incoming gradient.
pub trait Updater: Send + Sync {
    /// Applies one gradient to a single table entry.
    ///
    /// # Arguments
    /// * `entry` - The entry holding the live value and the rule's state.
    /// * `grad` - The gradient summed over a batch.
    /// * `worker` - The rank of the pushing worker.
    fn update(&self, entry: &mut Entry, grad: f32, worker: usize);

    /// The step size used for dense tensors, already divided by the batch size.
    fn tensor_step(&self) -> f32;
}

/// Turns a batch size into the factor normalizing a summed gradient.
pub(super) fn batch_scale(batch_size: usize) -> f32 {
    1. / batch_size.max(1) as f32
}
