//! Cache of radio addresses already registered with the transport.

use crate::ring::RingRegistry;
use crate::StorageError;
use mesh_wire::HwAddr;
use tracing::trace;

/// Default peer cache capacity
pub const DEFAULT_MAX_PEERS: usize = 32;

/// Bounded set of registered transport peers
#[derive(Debug, Clone)]
pub struct PeerCache {
    ring: RingRegistry<HwAddr>,
}

impl PeerCache {
    /// Create an empty cache holding at most `capacity` addresses
    pub fn new(capacity: usize) -> Result<Self, StorageError> {
        Ok(Self {
            ring: RingRegistry::new(capacity)?,
        })
    }

    /// Remember an address. Returns `true` when the transport still needs
    /// to be told about it.
    pub fn register(&mut self, addr: HwAddr) -> bool {
        if self.ring.contains(&addr) {
            return false;
        }
        if let Some(evicted) = self.ring.put(addr) {
            trace!("Peer cache full, dropped {}", evicted);
        }
        true
    }

    /// Whether an address is cached
    pub fn contains(&self, addr: &HwAddr) -> bool {
        self.ring.contains(addr)
    }

    /// Number of cached addresses
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Drop every cached address
    pub fn clear(&mut self) {
        self.ring.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> HwAddr {
        HwAddr([2, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_register_once() {
        let mut cache = PeerCache::new(4).unwrap();
        assert!(cache.register(addr(1)));
        assert!(!cache.register(addr(1)));
        assert!(cache.register(HwAddr::BROADCAST));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_overflow_forgets_oldest() {
        let mut cache = PeerCache::new(2).unwrap();
        cache.register(addr(1));
        cache.register(addr(2));
        cache.register(addr(3));
        assert!(!cache.contains(&addr(1)));
        // Forgotten addresses need registering again
        assert!(cache.register(addr(1)));
    }

    #[test]
    fn test_zero_capacity() {
        assert_eq!(
            PeerCache::new(0).unwrap_err(),
            StorageError::ZeroCapacity
        );
    }
}
