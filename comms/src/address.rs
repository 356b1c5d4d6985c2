use std::{
    error::Error,
    fmt::{self, Display},
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const SCHEME: &str = "tcp://";

/// The first id handed out to parameter servers.
pub const BEGIN_ID_OF_PS: u32 = 1;

/// Workers are numbered after this id, the id itself is the unregistered placeholder.
pub const BEGIN_ID_OF_WORKER: u32 = 10000;

/// Identifies a node inside the cluster.
///
/// `0` is the master, `[1, P]` are parameter servers and anything at or above
/// `BEGIN_ID_OF_WORKER` is a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const MASTER: NodeId = NodeId(0);

    /// The id a parameter server uses until the master assigns one.
    pub const SERVER_PLACEHOLDER: NodeId = NodeId(BEGIN_ID_OF_PS);

    /// The id a worker uses until the master assigns one.
    pub const WORKER_PLACEHOLDER: NodeId = NodeId(BEGIN_ID_OF_WORKER);

    /// Returns the id of the parameter server owning the given shard.
    pub fn server(shard: usize) -> Self {
        Self(BEGIN_ID_OF_PS + shard as u32)
    }

    /// Returns the id of the worker with the given 0-based rank.
    pub fn worker(rank: usize) -> Self {
        Self(BEGIN_ID_OF_WORKER + 1 + rank as u32)
    }

    pub fn is_master(self) -> bool {
        self.0 == 0
    }

    pub fn is_server(self) -> bool {
        (BEGIN_ID_OF_PS..BEGIN_ID_OF_WORKER).contains(&self.0)
    }

    pub fn is_worker(self) -> bool {
        self.0 >= BEGIN_ID_OF_WORKER
    }

    /// The 0-based rank of a registered worker.
    ///
    /// # Returns
    /// `None` if this id isn't an assigned worker id.
    pub fn worker_rank(self) -> Option<usize> {
        self.0
            .checked_sub(BEGIN_ID_OF_WORKER + 1)
            .map(|rank| rank as usize)
    }

    /// The 0-based shard index of a parameter server.
    pub fn server_shard(self) -> Option<usize> {
        self.is_server().then(|| (self.0 - BEGIN_ID_OF_PS) as usize)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The listen endpoint of a node: an IPv4 address and a port.
///
/// Its canonical textual form is `tcp://a.b.c.d:port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    octets: [u8; 4],
    port: u16,
}

impl NodeAddress {
    /// Creates a new `NodeAddress`.
    ///
    /// # Arguments
    /// * `octets` - The four octets of the IPv4 address.
    /// * `port` - The listen port.
    pub const fn new(octets: [u8; 4], port: u16) -> Self {
        Self { octets, port }
    }

    pub fn octets(&self) -> [u8; 4] {
        self.octets
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(self.octets), self.port))
    }
}

impl From<SocketAddrV4> for NodeAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(addr.ip().octets(), addr.port())
    }
}

impl TryFrom<SocketAddr> for NodeAddress {
    type Error = AddrParseErr;

    fn try_from(addr: SocketAddr) -> Result<Self, Self::Error> {
        match addr {
            SocketAddr::V4(v4) => Ok(v4.into()),
            SocketAddr::V6(v6) => Err(AddrParseErr(v6.to_string())),
        }
    }
}

impl Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.octets;
        write!(f, "{SCHEME}{a}.{b}.{c}.{d}:{}", self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = AddrParseErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let raw = raw.strip_prefix(SCHEME).unwrap_or(raw);

        raw.parse::<SocketAddrV4>()
            .map(Self::from)
            .map_err(|_| AddrParseErr(s.to_string()))
    }
}

impl Serialize for NodeAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Returned when a string isn't a valid `tcp://a.b.c.d:port` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrParseErr(pub String);

impl Display for AddrParseErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid node address {:?}, expected tcp://a.b.c.d:port", self.0)
    }
}

impl Error for AddrParseErr {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_canonical_form() {
        let addr: NodeAddress = "tcp://10.0.3.7:17832".parse().unwrap();
        assert_eq!(addr.octets(), [10, 0, 3, 7]);
        assert_eq!(addr.port(), 17832);
        assert_eq!(addr.to_string(), "tcp://10.0.3.7:17832");
    }

    #[test]
    fn test_address_without_scheme() {
        let addr: NodeAddress = "127.0.0.1:80".parse().unwrap();
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:80");
    }

    #[test]
    fn test_address_rejects_garbage() {
        assert!("tcp://localhost:80".parse::<NodeAddress>().is_err());
        assert!("tcp://1.2.3:80".parse::<NodeAddress>().is_err());
        assert!("tcp://1.2.3.4".parse::<NodeAddress>().is_err());
    }

    #[test]
    fn test_node_id_roles() {
        assert!(NodeId::MASTER.is_master());
        assert!(NodeId::server(0).is_server());
        assert_eq!(NodeId::server(1), NodeId(2));
        assert_eq!(NodeId::server(1).server_shard(), Some(1));

        let worker = NodeId::worker(3);
        assert!(worker.is_worker());
        assert_eq!(worker, NodeId(10004));
        assert_eq!(worker.worker_rank(), Some(3));
        assert_eq!(NodeId::WORKER_PLACEHOLDER.worker_rank(), None);
    }
}
