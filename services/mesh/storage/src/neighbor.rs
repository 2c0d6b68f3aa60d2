//! Neighbor registry.
//!
//! A bounded set of peers discovered through the handshake or seen sending
//! data. Entries are keyed by node id and looked up by scanning the ring, so
//! positions never need to be tracked outside of it.

use crate::ring::RingRegistry;
use crate::StorageError;
use mesh_wire::{HwAddr, NeighborSummary, NodeId};
use serde::Serialize;
use tracing::debug;

/// Default neighbor capacity
pub const DEFAULT_MAX_NEIGHBORS: usize = 32;

/// One known peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborEntry {
    /// Node id derived from the hardware address
    pub node_id: NodeId,
    /// Radio address the peer last sent from
    pub hw_addr: HwAddr,
    /// Protocol version from the last frame
    pub version: u8,
    /// Sequence number of the last frame
    pub last_seq: u16,
    /// Local tick of the last frame
    pub last_seen_ms: u32,
    /// Signal strength of the last frame in dBm
    pub rssi: i8,
    /// Advertised gateway capability
    pub is_gateway: bool,
}

impl NeighborEntry {
    /// Wire summary for table sharing
    pub fn summary(&self) -> NeighborSummary {
        NeighborSummary {
            node_id: self.node_id,
            hw_addr: self.hw_addr,
            version: self.version,
            rssi: self.rssi,
            is_gateway: self.is_gateway,
        }
    }
}

/// What a valid inbound frame tells us about its sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Sender node id
    pub node_id: NodeId,
    /// Sender radio address
    pub hw_addr: HwAddr,
    /// Header version
    pub version: u8,
    /// Header sequence number
    pub seq: u16,
    /// Local tick at receipt
    pub now_ms: u32,
    /// Signal strength reported by the transport
    pub rssi: i8,
    /// Gateway capability when the frame carried one
    pub is_gateway: Option<bool>,
}

impl Observation {
    fn into_entry(self) -> NeighborEntry {
        NeighborEntry {
            node_id: self.node_id,
            hw_addr: self.hw_addr,
            version: self.version,
            last_seq: self.seq,
            last_seen_ms: self.now_ms,
            rssi: self.rssi,
            is_gateway: self.is_gateway.unwrap_or(false),
        }
    }

    fn refresh(&self, entry: &mut NeighborEntry) {
        entry.hw_addr = self.hw_addr;
        entry.version = self.version;
        entry.last_seq = self.seq;
        entry.last_seen_ms = self.now_ms;
        entry.rssi = self.rssi;
        if let Some(is_gateway) = self.is_gateway {
            entry.is_gateway = is_gateway;
        }
    }
}

/// Outcome of recording an observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeighborUpdate {
    /// First frame from this node, stored with room to spare
    Added,
    /// Known node, fields refreshed in place
    Refreshed,
    /// First frame from this node, the oldest entry was overwritten
    Replaced {
        /// Entry that was dropped
        evicted: NeighborEntry,
    },
}

impl NeighborUpdate {
    /// Whether the node was not known before
    pub fn is_new(&self) -> bool {
        !matches!(self, NeighborUpdate::Refreshed)
    }
}

/// Bounded neighbor registry
#[derive(Debug, Clone)]
pub struct NeighborTable {
    ring: RingRegistry<NeighborEntry>,
}

impl NeighborTable {
    /// Create an empty table holding at most `capacity` neighbors
    pub fn new(capacity: usize) -> Result<Self, StorageError> {
        Ok(Self {
            ring: RingRegistry::new(capacity)?,
        })
    }

    /// Record a valid frame from a peer
    pub fn upsert(&mut self, obs: Observation) -> NeighborUpdate {
        if let Some(index) = self.position(obs.node_id) {
            if let Some(entry) = self.ring.get_at_mut(index) {
                obs.refresh(entry);
                return NeighborUpdate::Refreshed;
            }
        }

        match self.ring.put(obs.into_entry()) {
            None => NeighborUpdate::Added,
            Some(evicted) => {
                debug!(
                    "Neighbor table full, evicted {} ({})",
                    evicted.node_id, evicted.hw_addr
                );
                NeighborUpdate::Replaced { evicted }
            }
        }
    }

    /// Logical position of a node
    pub fn position(&self, node_id: NodeId) -> Option<usize> {
        self.ring.position(|entry| entry.node_id == node_id)
    }

    /// Entry for a node
    pub fn get(&self, node_id: NodeId) -> Option<&NeighborEntry> {
        self.position(node_id).and_then(|i| self.ring.get_at(i))
    }

    /// Whether a node is known
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.position(node_id).is_some()
    }

    /// Radio address of a known node
    pub fn hw_addr_of(&self, node_id: NodeId) -> Option<HwAddr> {
        self.get(node_id).map(|entry| entry.hw_addr)
    }

    /// Forget a node
    pub fn remove(&mut self, node_id: NodeId) -> Option<NeighborEntry> {
        let index = self.position(node_id)?;
        self.ring.remove_at(index).ok()
    }

    /// Entries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &NeighborEntry> + '_ {
        self.ring.iter()
    }

    /// Copy of every entry, oldest first
    pub fn entries(&self) -> Vec<NeighborEntry> {
        self.ring.to_vec()
    }

    /// Wire summaries of every entry, oldest first
    pub fn summaries(&self) -> Vec<NeighborSummary> {
        self.iter().map(NeighborEntry::summary).collect()
    }

    /// Number of neighbors
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether no neighbor is known
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Maximum number of neighbors
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(id: u16, seq: u16, now_ms: u32) -> Observation {
        Observation {
            node_id: NodeId(id),
            hw_addr: HwAddr([0x24, 0x6F, 0x28, 0x00, (id >> 8) as u8, id as u8]),
            version: 1,
            seq,
            now_ms,
            rssi: -60,
            is_gateway: None,
        }
    }

    #[test]
    fn test_add_then_refresh() {
        let mut table = NeighborTable::new(4).unwrap();
        assert_eq!(table.upsert(obs(0x0102, 1, 100)), NeighborUpdate::Added);

        let mut again = obs(0x0102, 7, 900);
        again.rssi = -42;
        assert_eq!(table.upsert(again), NeighborUpdate::Refreshed);

        assert_eq!(table.len(), 1);
        let entry = table.get(NodeId(0x0102)).unwrap();
        assert_eq!(entry.last_seq, 7);
        assert_eq!(entry.last_seen_ms, 900);
        assert_eq!(entry.rssi, -42);
    }

    #[test]
    fn test_refresh_keeps_position() {
        let mut table = NeighborTable::new(4).unwrap();
        for id in 1..=3 {
            table.upsert(obs(id, 0, 0));
        }
        table.upsert(obs(1, 5, 50));
        let order: Vec<u16> = table.iter().map(|e| e.node_id.0).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_gateway_flag_sticks_until_advertised() {
        let mut table = NeighborTable::new(2).unwrap();
        let mut hello = obs(9, 1, 10);
        hello.is_gateway = Some(true);
        table.upsert(hello);

        // Data frames carry no capability byte
        table.upsert(obs(9, 2, 20));
        assert!(table.get(NodeId(9)).unwrap().is_gateway);

        let mut hello = obs(9, 3, 30);
        hello.is_gateway = Some(false);
        table.upsert(hello);
        assert!(!table.get(NodeId(9)).unwrap().is_gateway);
    }

    #[test]
    fn test_full_table_evicts_oldest() {
        let mut table = NeighborTable::new(DEFAULT_MAX_NEIGHBORS).unwrap();
        for id in 1..=DEFAULT_MAX_NEIGHBORS as u16 {
            assert!(table.upsert(obs(id, 0, 0)).is_new());
        }

        match table.upsert(obs(1000, 0, 0)) {
            NeighborUpdate::Replaced { evicted } => assert_eq!(evicted.node_id, NodeId(1)),
            other => panic!("expected eviction, got {:?}", other),
        }
        assert_eq!(table.len(), DEFAULT_MAX_NEIGHBORS);
        assert!(!table.contains(NodeId(1)));
        assert!(table.contains(NodeId(1000)));
    }

    #[test]
    fn test_remove_then_lookup() {
        let mut table = NeighborTable::new(4).unwrap();
        for id in 1..=4 {
            table.upsert(obs(id, 0, 0));
        }
        assert_eq!(table.remove(NodeId(2)).unwrap().node_id, NodeId(2));
        assert!(table.remove(NodeId(2)).is_none());

        // Later entries shifted down and are still found by id
        assert_eq!(table.position(NodeId(3)), Some(1));
        assert_eq!(table.position(NodeId(4)), Some(2));
        assert_eq!(
            table.hw_addr_of(NodeId(4)),
            Some(HwAddr([0x24, 0x6F, 0x28, 0x00, 0x00, 0x04]))
        );
    }

    #[test]
    fn test_summaries() {
        let mut table = NeighborTable::new(DEFAULT_MAX_NEIGHBORS).unwrap();
        let mut hello = obs(0x0A0B, 3, 0);
        hello.is_gateway = Some(true);
        table.upsert(hello);

        let summaries = table.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].node_id, NodeId(0x0A0B));
        assert_eq!(summaries[0].rssi, -60);
        assert!(summaries[0].is_gateway);
        assert_eq!(table.capacity(), DEFAULT_MAX_NEIGHBORS);
    }
}
