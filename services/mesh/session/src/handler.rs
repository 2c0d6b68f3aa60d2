//! Application callbacks for inbound mesh traffic.

use mesh_wire::{HwAddr, NeighborSummary, NodeId};

/// Address pair identifying the sender of an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderAddr {
    /// Radio address the frame came from
    pub hw_addr: HwAddr,
    /// Node id derived from it
    pub node_id: NodeId,
}

/// Receives messages delivered by a mesh session.
///
/// Errors are logged by the session and never stop the receive loop.
pub trait MeshHandler: Send {
    /// A complete DATA message arrived
    fn on_data(&mut self, from: SenderAddr, payload: &[u8]) -> anyhow::Result<()>;

    /// A neighbor shared its own neighbor table in a HELLO_ACK
    fn on_neighbor_table(
        &mut self,
        from: SenderAddr,
        table: &[NeighborSummary],
    ) -> anyhow::Result<()> {
        let _ = (from, table);
        Ok(())
    }
}

impl<F> MeshHandler for F
where
    F: FnMut(SenderAddr, &[u8]) -> anyhow::Result<()> + Send,
{
    fn on_data(&mut self, from: SenderAddr, payload: &[u8]) -> anyhow::Result<()> {
        self(from, payload)
    }
}
