mod entry;
mod error;
mod stats;
mod table;
mod tensor;

pub use entry::Entry;
pub use error::{Result, SizeMismatchErr};
pub use stats::{StatsSnapshot, TableStats};
pub use table::ShardedKeyTable;
pub use tensor::TensorTable;
