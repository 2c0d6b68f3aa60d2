//! Node identity derived from the radio address.

use mesh_wire::{HwAddr, NodeId};
use once_cell::sync::OnceCell;
use tracing::debug;

/// Derive the node id of any radio address from its two last bytes
pub fn id_of(addr: &HwAddr) -> NodeId {
    NodeId(u16::from_be_bytes([addr.0[4], addr.0[5]]))
}

/// Identity of the local node, derived once and then fixed
#[derive(Debug)]
pub struct LocalIdentity {
    hw_addr: HwAddr,
    node_id: OnceCell<NodeId>,
}

impl LocalIdentity {
    /// Identity for the given radio address
    pub fn new(hw_addr: HwAddr) -> Self {
        Self {
            hw_addr,
            node_id: OnceCell::new(),
        }
    }

    /// Local radio address
    pub fn hw_addr(&self) -> HwAddr {
        self.hw_addr
    }

    /// Local node id
    pub fn node_id(&self) -> NodeId {
        *self.node_id.get_or_init(|| {
            let id = id_of(&self.hw_addr);
            debug!("Derived node id {} from {}", id, self.hw_addr);
            id
        })
    }

    /// Whether the id has been derived yet
    pub fn is_derived(&self) -> bool {
        self.node_id.get().is_some()
    }
}
