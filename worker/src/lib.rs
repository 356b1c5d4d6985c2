//! Worker side of the cluster: key placement, pull/push clients and ring all-reduce.

mod consistent_hash;
mod context;
mod error;
pub mod fusion;
mod pull;
mod push;
pub mod ring;
mod worker;

pub use consistent_hash::ConsistentHash;
pub use context::Context;
pub use error::{Result, WorkerErr};
pub use fusion::BufferFusion;
pub use pull::Pull;
pub use push::Push;
pub use ring::RingReduce;
pub use worker::Worker;
