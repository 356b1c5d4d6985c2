use std::time::Instant;

/// One parameter of the key table and the state its update rule keeps.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The live value, only touched under the table's write lock.
    pub value: f32,
    /// Sum or running average of squared gradients, depending on the rule.
    pub accum: f32,
    snapshot: f32,
    shadows: Vec<f32>,
    updated_at: Instant,
}

impl Entry {
    /// Creates a new `Entry` holding `value`, published right away.
    pub fn new(value: f32) -> Self {
        Self {
            value,
            accum: 0.,
            snapshot: value,
            shadows: Vec::new(),
            updated_at: Instant::now(),
        }
    }

    /// The value readers observe.
    pub fn snapshot(&self) -> f32 {
        self.snapshot
    }

    /// Copies the live value into the snapshot.
    pub fn publish(&mut self) {
        self.snapshot = self.value;
        self.updated_at = Instant::now();
    }

    pub fn updated_at(&self) -> Instant {
        self.updated_at
    }

    /// The value `worker` last left behind, zero if it never pushed this key.
    pub fn shadow_mut(&mut self, worker: usize) -> &mut f32 {
        if self.shadows.len() <= worker {
            self.shadows.resize(worker + 1, 0.);
        }

        &mut self.shadows[worker]
    }
}
