//! Fixed 11-byte packet header.
//!
//! Layout (little-endian), followed on the wire by one CRC-8 byte over these
//! eleven bytes and then the payload:
//!
//! ```text
//! +---------+------------------+-----+-----+-----+-----+-------+------+
//! | version | type | chunk<<5  | src | dst | seq | ttl | flags | plen |
//! |   u8    |        u8        | u16 | u16 | u16 | u8  |  u8   |  u8  |
//! +---------+------------------+-----+-----+-----+-----+-------+------+
//! ```
//!
//! The base flag byte is fully allocated, so the three chunk markers ride in
//! the upper bits of the type byte.

use crate::addr::NodeId;
use crate::WireError;
use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// Mesh protocol version
pub const MESH_VERSION: u8 = 1;

/// Header size in bytes, without the checksum
pub const HEADER_SIZE: usize = 11;

/// Checksum size in bytes
pub const CHECKSUM_SIZE: usize = 1;

/// Largest payload carried by one frame
pub const MAX_PAYLOAD_SIZE: usize = 239;

/// Largest frame this codec produces.
///
/// This is 251 bytes, one more than ESP-NOW's 250-byte payload. Radios with a
/// smaller limit report it through `max_frame_size` and senders chunk at
/// 238 bytes or less there; the codec itself keeps 239 so a full frame from a
/// radio without that limit still parses.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE + MAX_PAYLOAD_SIZE;

/// Default hop budget for locally originated frames
pub const DEFAULT_TTL: u8 = 10;

const TYPE_MASK: u8 = 0x1F;
const CHUNK_SHIFT: u32 = 5;
const CHUNK_FLAG_SHIFT: u32 = 8;

/// Packet types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    /// Node announces itself
    Hello = 1,
    /// Reply to a HELLO, optionally carrying a neighbor table snapshot
    HelloAck = 2,
    /// Application data
    Data = 3,
    /// Acknowledgment
    Ack = 4,
    /// Control message
    Ctrl = 5,
}

impl TryFrom<u8> for PacketType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Hello),
            2 => Ok(PacketType::HelloAck),
            3 => Ok(PacketType::Data),
            4 => Ok(PacketType::Ack),
            5 => Ok(PacketType::Ctrl),
            _ => Err(WireError::Type(value)),
        }
    }
}

bitflags! {
    /// Packet flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Flags: u16 {
        /// Sender requests an acknowledgment
        const ACK = 1 << 0;
        /// Addressed to every neighbor
        const BROADCAST = 1 << 1;
        /// Addressed to one node
        const UNICAST = 1 << 2;
        /// Addressed to a node group
        const MULTICAST = 1 << 3;
        /// Delivery should be acknowledged by the transport
        const RELIABLE = 1 << 4;
        /// Best-effort delivery
        const UNRELIABLE = 1 << 5;
        /// Payload travels encrypted
        const SECURE = 1 << 6;
        /// Payload travels in plain text
        const UNSECURE = 1 << 7;
        /// First frame of a chunk series
        const CHUNK_START = 1 << 8;
        /// Interior frame of a chunk series
        const CHUNK_CONT = 1 << 9;
        /// Last frame of a chunk series
        const CHUNK_END = 1 << 10;
    }
}

impl Flags {
    /// All chunk markers
    pub const CHUNK_MASK: Flags = Flags::CHUNK_START
        .union(Flags::CHUNK_CONT)
        .union(Flags::CHUNK_END);

    /// Whether any chunk marker is set
    pub fn is_chunk(&self) -> bool {
        self.intersects(Self::CHUNK_MASK)
    }

    fn base_byte(self) -> u8 {
        (self.bits() & 0x00FF) as u8
    }

    fn chunk_bits(self) -> u8 {
        ((self.bits() >> CHUNK_FLAG_SHIFT) & 0x07) as u8
    }

    fn from_wire(base: u8, chunk: u8) -> Self {
        Flags::from_bits_truncate(base as u16 | ((chunk as u16 & 0x07) << CHUNK_FLAG_SHIFT))
    }
}

/// Packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Protocol version
    pub version: u8,
    /// Packet type
    pub typ: PacketType,
    /// Source node
    pub src: NodeId,
    /// Destination node, broadcast is 0xFFFF
    pub dst: NodeId,
    /// Per-sender sequence number
    pub seq: u16,
    /// Hop budget, carried but not enforced
    pub ttl: u8,
    /// Flags including chunk markers
    pub flags: Flags,
    /// Payload length
    pub plen: u8,
}

impl Header {
    /// Create a header with the default TTL and no flags
    pub fn new(typ: PacketType, src: NodeId, dst: NodeId, seq: u16) -> Self {
        Self {
            version: MESH_VERSION,
            typ,
            src,
            dst,
            seq,
            ttl: DEFAULT_TTL,
            flags: Flags::empty(),
            plen: 0,
        }
    }

    /// Set the TTL
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Add flags
    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags |= flags;
        self
    }

    /// Whether the destination is the broadcast id
    pub fn is_broadcast(&self) -> bool {
        self.dst.is_broadcast()
    }

    /// Encode the header (without checksum)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8((self.typ as u8 & TYPE_MASK) | (self.flags.chunk_bits() << CHUNK_SHIFT));
        buf.put_u16_le(self.src.0);
        buf.put_u16_le(self.dst.0);
        buf.put_u16_le(self.seq);
        buf.put_u8(self.ttl);
        buf.put_u8(self.flags.base_byte());
        buf.put_u8(self.plen);
    }

    /// Decode the header from the first [`HEADER_SIZE`] bytes.
    ///
    /// Only the type is validated here; version and length checks belong to
    /// the packet codec, after the checksum has been verified.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_SIZE {
            return Err(WireError::Incomplete);
        }
        let mut buf = &bytes[..HEADER_SIZE];

        let version = buf.get_u8();
        let type_byte = buf.get_u8();
        let typ = PacketType::try_from(type_byte & TYPE_MASK)?;
        let src = NodeId(buf.get_u16_le());
        let dst = NodeId(buf.get_u16_le());
        let seq = buf.get_u16_le();
        let ttl = buf.get_u8();
        let flags = Flags::from_wire(buf.get_u8(), type_byte >> CHUNK_SHIFT);
        let plen = buf.get_u8();

        Ok(Self {
            version,
            typ,
            src,
            dst,
            seq,
            ttl,
            flags,
            plen,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_conversion() {
        assert_eq!(PacketType::try_from(1).unwrap(), PacketType::Hello);
        assert_eq!(PacketType::try_from(5).unwrap(), PacketType::Ctrl);
        assert_eq!(PacketType::try_from(0), Err(WireError::Type(0)));
        assert_eq!(PacketType::try_from(6), Err(WireError::Type(6)));
    }

    #[test]
    fn test_flags() {
        let flags = Flags::BROADCAST | Flags::ACK | Flags::UNSECURE;
        assert_eq!(flags.bits(), 0b1000_0011);
        assert!(!flags.is_chunk());
        assert!((flags | Flags::CHUNK_END).is_chunk());
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(MAX_FRAME_SIZE, 251);
    }

    #[test]
    fn test_wire_layout() {
        let mut header = Header::new(PacketType::Data, NodeId(0x0102), NodeId(0xA0B0), 0x1234)
            .with_ttl(3)
            .with_flags(Flags::UNICAST | Flags::ACK | Flags::CHUNK_CONT);
        header.plen = 7;

        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        assert_eq!(
            &buf[..],
            &[0x01, 0x03 | (0b010 << 5), 0x02, 0x01, 0xB0, 0xA0, 0x34, 0x12, 0x03, 0x05, 0x07]
        );
    }

    #[test]
    fn test_header_encode_decode() {
        let mut header = Header::new(PacketType::HelloAck, NodeId(0xBEEF), NodeId(0x0001), 65535)
            .with_flags(Flags::UNICAST | Flags::SECURE | Flags::CHUNK_START);
        header.plen = 239;

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);

        assert_eq!(Header::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_decode_rejects_short_and_unknown_type() {
        assert_eq!(Header::decode(&[0x01, 0x01]), Err(WireError::Incomplete));

        let bad_type = [0x01, 0x1F, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(Header::decode(&bad_type), Err(WireError::Type(0x1F)));
    }
}
