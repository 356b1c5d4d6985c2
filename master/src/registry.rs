use comms::{NodeAddress, NodeId};

/// The outcome of a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new node got this id.
    Admitted(NodeId),
    /// The address already registered, it keeps its id.
    Repeated(NodeId),
    /// Every slot of the node's kind is taken.
    Refused,
}

/// Hands out ids in registration order, one per distinct address.
#[derive(Debug)]
pub struct Registry {
    ps_count: usize,
    worker_count: usize,
    servers: Vec<NodeAddress>,
    workers: Vec<NodeAddress>,
}

impl Registry {
    pub fn new(ps_count: usize, worker_count: usize) -> Self {
        Self {
            ps_count,
            worker_count,
            servers: Vec::with_capacity(ps_count),
            workers: Vec::with_capacity(worker_count),
        }
    }

    /// Registers the node behind a handshake.
    ///
    /// # Arguments
    /// * `sender` - The handshake's sender, a server or worker placeholder.
    /// * `addr` - The address the node listens on.
    pub fn register(&mut self, sender: NodeId, addr: NodeAddress) -> Admission {
        let (list, capacity, id_of): (_, _, fn(usize) -> NodeId) = if sender.is_server() {
            (&mut self.servers, self.ps_count, NodeId::server)
        } else {
            (&mut self.workers, self.worker_count, NodeId::worker)
        };

        if let Some(i) = list.iter().position(|known| *known == addr) {
            return Admission::Repeated(id_of(i));
        }

        if list.len() == capacity {
            return Admission::Refused;
        }

        list.push(addr);
        Admission::Admitted(id_of(list.len() - 1))
    }

    pub fn is_complete(&self) -> bool {
        self.servers.len() == self.ps_count && self.workers.len() == self.worker_count
    }

    /// Server addresses in id order.
    pub fn servers(&self) -> &[NodeAddress] {
        &self.servers
    }

    /// Worker addresses in id order.
    pub fn workers(&self) -> &[NodeAddress] {
        &self.workers
    }

    pub fn server_ids(&self) -> Vec<NodeId> {
        (0..self.servers.len()).map(NodeId::server).collect()
    }

    pub fn worker_ids(&self) -> Vec<NodeId> {
        (0..self.workers.len()).map(NodeId::worker).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> NodeAddress {
        NodeAddress::new([127, 0, 0, 1], port)
    }

    #[test]
    fn test_ids_follow_registration_order() {
        let mut registry = Registry::new(2, 2);

        assert_eq!(
            registry.register(NodeId::WORKER_PLACEHOLDER, addr(5000)),
            Admission::Admitted(NodeId(10001))
        );
        assert_eq!(
            registry.register(NodeId::SERVER_PLACEHOLDER, addr(4000)),
            Admission::Admitted(NodeId(1))
        );
        assert_eq!(
            registry.register(NodeId::SERVER_PLACEHOLDER, addr(4001)),
            Admission::Admitted(NodeId(2))
        );
        assert!(!registry.is_complete());

        assert_eq!(
            registry.register(NodeId::WORKER_PLACEHOLDER, addr(5001)),
            Admission::Admitted(NodeId(10002))
        );
        assert!(registry.is_complete());
        assert_eq!(registry.servers(), [addr(4000), addr(4001)]);
        assert_eq!(registry.worker_ids(), [NodeId(10001), NodeId(10002)]);
    }

    #[test]
    fn test_repeated_address_keeps_its_id() {
        let mut registry = Registry::new(1, 1);
        registry.register(NodeId::SERVER_PLACEHOLDER, addr(4000));

        assert_eq!(
            registry.register(NodeId::SERVER_PLACEHOLDER, addr(4000)),
            Admission::Repeated(NodeId(1))
        );
        assert_eq!(registry.servers().len(), 1);
    }

    #[test]
    fn test_extra_nodes_are_refused() {
        let mut registry = Registry::new(0, 1);

        assert_eq!(
            registry.register(NodeId::SERVER_PLACEHOLDER, addr(4000)),
            Admission::Refused
        );
        registry.register(NodeId::WORKER_PLACEHOLDER, addr(5000));
        assert_eq!(
            registry.register(NodeId::WORKER_PLACEHOLDER, addr(5001)),
            Admission::Refused
        );
        assert!(registry.is_complete());
    }
}
