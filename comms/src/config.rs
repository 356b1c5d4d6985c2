//! Node configuration, loadable from JSON or from the environment.

use std::{env, io, path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::NodeAddress;

/// Env var holding the master's address.
pub const MASTER_ADDR_VAR: &str = "CTR_MASTER_ADDR";
/// Env var holding the amount of parameter servers.
pub const PS_NUM_VAR: &str = "CTR_PS_NUM";
/// Env var holding the amount of workers.
pub const WORKER_NUM_VAR: &str = "CTR_WORKER_NUM";
/// Env var holding the run mode, `parameter_server` or `ring`.
pub const RUN_MODE_VAR: &str = "CTR_RUN_MODE";

const DEFAULT_MASTER_ADDR: NodeAddress = NodeAddress::new([127, 0, 0, 1], 17832);

/// How the workers exchange gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Sharded key/value exchange through parameter servers.
    #[default]
    ParameterServer,
    /// Collective averaging along a ring of workers, no servers involved.
    Ring,
}

impl FromStr for RunMode {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parameter_server" | "ps" => Ok(RunMode::ParameterServer),
            "ring" => Ok(RunMode::Ring),
            other => Err(invalid_value(RUN_MODE_VAR, other)),
        }
    }
}

/// The shape of the cluster, shared by every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub master_addr: NodeAddress,
    pub ps_count: usize,
    pub worker_count: usize,
    pub mode: RunMode,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            master_addr: DEFAULT_MASTER_ADDR,
            ps_count: 0,
            worker_count: 3,
            mode: RunMode::default(),
        }
    }
}

impl ClusterConfig {
    /// Reads the configuration from the `CTR_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Returns
    /// An io error if a variable is set to an unparseable value.
    pub fn from_env() -> io::Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = read_var(MASTER_ADDR_VAR)? {
            config.master_addr = addr;
        }
        if let Some(ps_count) = read_var(PS_NUM_VAR)? {
            config.ps_count = ps_count;
        }
        if let Some(worker_count) = read_var(WORKER_NUM_VAR)? {
            config.worker_count = worker_count;
        }
        if let Some(mode) = read_var(RUN_MODE_VAR)? {
            config.mode = mode;
        }

        Ok(config)
    }

    pub fn from_json(raw: &str) -> io::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

/// Socket level settings of a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// The endpoint to listen on, port `0` picks a free one.
    pub listen: NodeAddress,
    /// Age after which an unanswered request is resent.
    pub rtt_timeout_ms: u64,
    /// Extra connect attempts after the first one fails.
    pub connect_retries: u32,
    pub connect_retry_interval_ms: u64,
    /// Amount of requests handled concurrently.
    pub handler_threads: usize,
    /// Drop a request after this many resends, `None` resends forever.
    pub max_resends: Option<u32>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(2, |n| n.get());

        Self {
            listen: NodeAddress::new([127, 0, 0, 1], 0),
            rtt_timeout_ms: 10_000,
            connect_retries: 3,
            connect_retry_interval_ms: 5_000,
            handler_threads: (cores / 2).max(1),
            max_resends: None,
        }
    }
}

impl TransportConfig {
    pub fn rtt_timeout(&self) -> Duration {
        Duration::from_millis(self.rtt_timeout_ms)
    }

    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }

    pub fn from_json(raw: &str) -> io::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

fn read_var<T: FromStr>(name: &str) -> io::Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| invalid_value(name, &raw)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(io::Error::new(io::ErrorKind::InvalidInput, e)),
    }
}

fn invalid_value(name: &str, raw: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("invalid value {raw:?} for {name}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_defaults() {
        let config = ClusterConfig::default();
        assert_eq!(config.master_addr.to_string(), "tcp://127.0.0.1:17832");
        assert_eq!(config.ps_count, 0);
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.mode, RunMode::ParameterServer);
    }

    #[test]
    fn test_cluster_from_json() {
        let raw = r#"{
            "master_addr": "tcp://10.0.0.1:9000",
            "ps_count": 2,
            "mode": "ring"
        }"#;

        let config = ClusterConfig::from_json(raw).unwrap();
        assert_eq!(config.master_addr.port(), 9000);
        assert_eq!(config.ps_count, 2);
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.mode, RunMode::Ring);
    }

    #[test]
    fn test_transport_defaults() {
        let config = TransportConfig::from_json("{}").unwrap();
        assert_eq!(config.rtt_timeout(), Duration::from_secs(10));
        assert_eq!(config.connect_retries, 3);
        assert_eq!(config.max_resends, None);
        assert!(config.handler_threads >= 1);
    }

    #[test]
    fn test_run_mode_parsing() {
        assert_eq!("ring".parse::<RunMode>().unwrap(), RunMode::Ring);
        assert_eq!(" PS ".parse::<RunMode>().unwrap(), RunMode::ParameterServer);
        assert!("mesh".parse::<RunMode>().is_err());
    }
}
