//! Radio frame format, header checksum, and chunking for pico-mesh.
//!
//! This crate is the on-the-wire contract of the mesh: a fixed 11-byte header
//! protected by a CRC-8, a payload of up to 239 bytes, and the chunk markers
//! used to carry messages that do not fit in one frame.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | Header (11B)         | version, type, src, dst,   |
//! |                      | seq, ttl, flags, plen      |
//! +----------------------+----------------------------+
//! | CRC-8 (1B)           | over the header only       |
//! +----------------------+----------------------------+
//! | payload              | plen bytes (0..239)        |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod addr;
pub mod checksum;
pub mod chunk;
pub mod codec;
pub mod error;
pub mod header;
pub mod table;

// Re-export main types
pub use addr::{HwAddr, NodeId, HW_ADDR_LEN};
pub use chunk::{Chunker, Frames, Reassembler, ReassemblyLimits};
pub use codec::{build_packet, parse_packet, Packet, PacketBuilder};
pub use error::WireError;
pub use header::{
    Flags, Header, PacketType, CHECKSUM_SIZE, DEFAULT_TTL, HEADER_SIZE, MAX_FRAME_SIZE,
    MAX_PAYLOAD_SIZE, MESH_VERSION,
};
pub use table::{decode_table, encode_table, NeighborSummary};
