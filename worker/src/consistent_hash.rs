use std::collections::BTreeMap;

use comms::NodeId;
use xxhash_rust::xxh3::xxh3_64;

/// Virtual positions each shard takes on the ring.
const REPLICAS: usize = 5;

/// Maps keys to parameter server shards.
///
/// Every shard owns `REPLICAS` positions on a 64 bit ring, a key belongs to
/// the first position at or after its own hash, wrapping around at the end.
#[derive(Debug, Clone)]
pub struct ConsistentHash {
    ring: BTreeMap<u64, usize>,
    shards: usize,
}

impl ConsistentHash {
    /// Creates a new `ConsistentHash`.
    ///
    /// # Arguments
    /// * `shards` - The amount of parameter servers.
    ///
    /// # Panics
    /// If `shards` is zero.
    pub fn new(shards: usize) -> Self {
        assert!(shards > 0, "a hash ring needs at least one shard");

        let ring = (0..shards)
            .flat_map(|shard| {
                (0..REPLICAS).map(move |replica| {
                    let position = xxh3_64(format!("{shard}-{replica}").as_bytes());
                    (position, shard)
                })
            })
            .collect();

        Self { ring, shards }
    }

    pub fn shards(&self) -> usize {
        self.shards
    }

    /// Returns the 0-based shard owning `key`.
    pub fn get_node(&self, key: u64) -> usize {
        let hash = xxh3_64(&key.to_le_bytes());

        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.first_key_value())
            .map(|(_, shard)| *shard)
            .unwrap_or_default()
    }

    /// Returns the id of the parameter server owning `key`.
    pub fn node_id(&self, key: u64) -> NodeId {
        NodeId::server(self.get_node(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_is_deterministic() {
        let a = ConsistentHash::new(4);
        let b = ConsistentHash::new(4);

        for key in 0..1000 {
            assert_eq!(a.get_node(key), b.get_node(key));
            assert!(a.get_node(key) < 4);
        }
    }

    #[test]
    fn test_every_shard_gets_keys() {
        let hash = ConsistentHash::new(3);
        let mut counts = [0; 3];

        for key in 0..10_000 {
            counts[hash.get_node(key)] += 1;
        }

        assert!(counts.iter().all(|&count| count > 0), "{counts:?}");
    }

    #[test]
    fn test_single_shard_owns_everything() {
        let hash = ConsistentHash::new(1);
        assert_eq!(hash.get_node(u64::MAX), 0);
        assert_eq!(hash.node_id(42), NodeId(1));
    }

    #[test]
    fn test_wraps_past_the_last_position() {
        let hash = ConsistentHash::new(2);
        let (&last, _) = hash.ring.last_key_value().unwrap();
        let (_, &first_shard) = hash.ring.first_key_value().unwrap();

        // Any key hashing above the last position belongs to the first one.
        let key = (0..u64::MAX)
            .find(|key| xxh3_64(&key.to_le_bytes()) > last)
            .unwrap();
        assert_eq!(hash.get_node(key), first_shard);
    }

    #[test]
    #[should_panic(expected = "at least one shard")]
    fn test_zero_shards_panics() {
        ConsistentHash::new(0);
    }
}
