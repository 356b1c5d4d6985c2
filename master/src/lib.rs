//! The cluster coordinator: registers nodes, tells them about each other,
//! watches their liveness and shuts the servers down once training ends.

mod error;
pub mod heartbeat;
mod master;
pub mod registry;

pub use error::{MasterErr, Result};
pub use heartbeat::{HeartbeatConfig, LinkState};
pub use master::Master;
