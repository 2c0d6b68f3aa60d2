//! Session and transport errors.

use mesh_storage::StorageError;
use mesh_wire::{HwAddr, NodeId, WireError};
use thiserror::Error;

/// Errors raised by a radio transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The radio is switched off
    #[error("radio is inactive")]
    Inactive,
    /// Unicast to an address that was never registered
    #[error("peer {0} not registered")]
    UnknownPeer(HwAddr),
    /// Unicast requested an acknowledgment and none came back
    #[error("no acknowledgment from {0}")]
    NoAck(HwAddr),
    /// The medium is gone
    #[error("transport closed")]
    Closed,
    /// Frame larger than the radio can carry
    #[error("frame of {0} bytes exceeds radio limit")]
    PayloadTooLarge(usize),
    /// Pre-shared key of the wrong length
    #[error("key must be 16 bytes, got {0}")]
    InvalidKey(usize),
}

/// Mesh session errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Send attempted before `start()`
    #[error("mesh session not started")]
    NotStarted,
    /// Node id not present in the neighbor table
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Encoding failure
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    /// Registry construction failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// Receive window string not understood
    #[error("invalid receive window: {0:?}")]
    InvalidWindow(String),
}
