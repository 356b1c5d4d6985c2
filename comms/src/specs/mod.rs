//! Serializable node specifications, shipped as JSON next to the cluster config.

pub mod server;
pub mod worker;
