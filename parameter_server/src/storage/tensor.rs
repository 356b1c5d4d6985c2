use std::collections::HashMap;

use parking_lot::RwLock;
use rayon::prelude::*;

use super::{Result, SizeMismatchErr};

/// Tensors shorter than this are updated on the calling thread.
const PARALLEL_MIN_LEN: usize = 4096;

/// Dense parameters addressed by their offset in the worker's arena.
#[derive(Debug, Default)]
pub struct TensorTable {
    tensors: RwLock<HashMap<u64, Vec<f32>>>,
}

impl TensorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tensors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.read().is_empty()
    }

    /// Copies the tensor at `offset`, creating a zeroed one of length `len` if missing.
    ///
    /// # Returns
    /// A `SizeMismatchErr` if a tensor of a different length already lives there.
    pub fn pull(&self, offset: u64, len: usize) -> Result<Vec<f32>> {
        if let Some(tensor) = self.tensors.read().get(&offset) {
            return Self::check_len(offset, tensor, len).map(|_| tensor.clone());
        }

        let mut tensors = self.tensors.write();
        let tensor = tensors.entry(offset).or_insert_with(|| vec![0.; len]);
        Self::check_len(offset, tensor, len)?;
        Ok(tensor.clone())
    }

    /// Descends the tensor at `offset` along `grad`: `t -= grad · step`.
    ///
    /// # Returns
    /// A `SizeMismatchErr` if the lengths differ, the tensor is left untouched.
    pub fn push(&self, offset: u64, grad: &[f32], step: f32) -> Result<()> {
        let mut tensors = self.tensors.write();
        let tensor = tensors
            .entry(offset)
            .or_insert_with(|| vec![0.; grad.len()]);

        Self::check_len(offset, tensor, grad.len())?;

        if tensor.len() >= PARALLEL_MIN_LEN {
            tensor
                .par_iter_mut()
                .zip(grad.par_iter())
                .for_each(|(t, g)| *t -= g * step);
        } else {
            tensor
                .iter_mut()
                .zip(grad)
                .for_each(|(t, g)| *t -= g * step);
        }

        Ok(())
    }

    pub fn get(&self, offset: u64) -> Option<Vec<f32>> {
        self.tensors.read().get(&offset).cloned()
    }

    fn check_len(offset: u64, tensor: &[f32], got: usize) -> Result<()> {
        if tensor.len() != got {
            return Err(SizeMismatchErr {
                offset,
                expected: tensor.len(),
                got,
            });
        }

        Ok(())
    }
}
