//! A distributed training substrate: parameter servers sharding a key/value
//! table among workers, or a ring all-reduce among workers alone, bootstrapped
//! and watched by a master.
//!
//! Every role lives in its own crate, re-exported here.

pub use comms;
pub use master;
pub use parameter_server;
pub use worker;

pub use comms::{ClusterConfig, NodeAddress, NodeId, RunMode, TransportConfig};
pub use master::Master;
pub use parameter_server::ParameterServer;
pub use worker::{BufferFusion, RingReduce, Worker};
