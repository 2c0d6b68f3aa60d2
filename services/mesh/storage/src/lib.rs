//! Bounded storage for the mesh: a fixed-capacity ring with overwrite-oldest
//! semantics, and the neighbor registry and peer cache built on top of it.
//!
//! Nothing here allocates after construction. Every store is mutated only by
//! the task that owns the mesh session, so there is no internal locking.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod neighbor;
pub mod peers;
pub mod ring;

use thiserror::Error;

/// Storage errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A ring needs room for at least one item
    #[error("capacity must be greater than zero")]
    ZeroCapacity,
    /// Logical index past the stored items
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Items currently stored
        len: usize,
    },
    /// Nothing stored
    #[error("registry is empty")]
    Empty,
}

pub use neighbor::{
    NeighborEntry, NeighborTable, NeighborUpdate, Observation, DEFAULT_MAX_NEIGHBORS,
};
pub use peers::{PeerCache, DEFAULT_MAX_PEERS};
pub use ring::RingRegistry;
