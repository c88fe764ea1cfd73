//! Consistent-hash ring mapping primary keys to worker shards.

use std::collections::BTreeMap;

use md5::{Digest, Md5};

/// Identifier for one worker shard in a ring.
pub type ShardId = usize;

/// 128-bit MD5 digest used as the ring's sort key.
///
/// Not a cryptographic use of MD5 — only a well-distributed, deterministic
/// hash across hosts is required here.
type RingKey = [u8; 16];

fn md5_key(s: &str) -> RingKey {
    let digest = Md5::digest(s.as_bytes());
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest);
    key
}

#[derive(Debug, thiserror::Error)]
pub enum HashRingError {
    #[error("virtual node collision while inserting shard {0}")]
    VirtualNodeCollision(ShardId),
    #[error("ring has no shards")]
    Empty,
}

/// A consistent-hash ring with `replicas` virtual nodes per shard.
///
/// Built once at registration time and never mutated at runtime, so it is
/// safe to share behind an `Arc` across the receiver's handling path
/// without additional synchronization.
#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    replicas: usize,
    ring: BTreeMap<RingKey, ShardId>,
}

impl ConsistentHashRing {
    /// Default virtual-node count, exposed as a tunable.
    pub const DEFAULT_REPLICAS: usize = 100;

    pub fn new(replicas: usize) -> Self {
        Self {
            replicas,
            ring: BTreeMap::new(),
        }
    }

    /// Build a ring over `0..shard_count` shards in one shot — the common
    /// case for [`crate::worker_pool::WorkerPool`] construction.
    pub fn with_shards(shard_count: usize, replicas: usize) -> Result<Self, HashRingError> {
        let mut ring = Self::new(replicas);
        for shard in 0..shard_count {
            ring.insert(shard)?;
        }
        Ok(ring)
    }

    /// Insert shard `s`: for `i in [0, replicas)` compute
    /// `hash("{s}:{i}")`, rejecting collisions.
    pub fn insert(&mut self, shard: ShardId) -> Result<(), HashRingError> {
        for i in 0..self.replicas {
            let key = md5_key(&format!("{shard}:{i}"));
            if self.ring.contains_key(&key) {
                return Err(HashRingError::VirtualNodeCollision(shard));
            }
            self.ring.insert(key, shard);
        }
        Ok(())
    }

    /// Remove all virtual-key entries for shard `s`.
    pub fn remove(&mut self, shard: ShardId) {
        self.ring.retain(|_, v| *v != shard);
    }

    /// Look up the shard owning `pk`: the successor of `hash(pk)` on the
    /// sorted ring, wrapping to index 0 past the end.
    pub fn lookup(&self, pk: &str) -> Result<ShardId, HashRingError> {
        if self.ring.is_empty() {
            return Err(HashRingError::Empty);
        }
        let key = md5_key(pk);
        let shard = self
            .ring
            .range(key..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, shard)| *shard)
            .expect("ring is non-empty");
        Ok(shard)
    }

    pub fn shard_count(&self) -> usize {
        self.ring.values().collect::<std::collections::HashSet<_>>().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_a_pure_function_of_ring_state() {
        let ring = ConsistentHashRing::with_shards(3, 50).unwrap();
        let a = ring.lookup("42").unwrap();
        let b = ring.lookup("42").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn every_pk_lands_on_a_known_shard() {
        let ring = ConsistentHashRing::with_shards(3, ConsistentHashRing::DEFAULT_REPLICAS).unwrap();
        for pk in 0..200 {
            let shard = ring.lookup(&pk.to_string()).unwrap();
            assert!(shard < 3);
        }
    }

    #[test]
    fn remove_drops_all_virtual_nodes_for_a_shard() {
        let mut ring = ConsistentHashRing::with_shards(2, 10).unwrap();
        ring.remove(0);
        for pk in 0..50 {
            assert_eq!(ring.lookup(&pk.to_string()).unwrap(), 1);
        }
    }

    #[test]
    fn distribution_is_reasonably_even() {
        let ring = ConsistentHashRing::with_shards(3, ConsistentHashRing::DEFAULT_REPLICAS).unwrap();
        let mut counts = [0usize; 3];
        for pk in 0..3000 {
            counts[ring.lookup(&pk.to_string()).unwrap()] += 1;
        }
        for c in counts {
            assert!(c > 600 && c < 1600, "uneven distribution: {counts:?}");
        }
    }
}
