//! The parameter server: owns one shard of the model and serves pulls and pushes.

mod error;
pub mod optimization;
mod service;
pub mod storage;
pub mod synchronization;

pub use error::{Result, ServerErr};
pub use service::{ParameterServer, ServerState};
