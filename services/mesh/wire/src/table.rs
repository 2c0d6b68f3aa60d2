//! Neighbor table snapshot carried in HELLO_ACK payloads.
//!
//! ```text
//! count: u8
//! count x { node_id: u16 LE, hw_addr: [u8; 6], version: u8, rssi: i8, flags: u8 }
//! ```

use crate::addr::{HwAddr, NodeId, HW_ADDR_LEN};
use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Encoded size of one entry
pub const ENTRY_SIZE: usize = 2 + HW_ADDR_LEN + 3;

/// Most entries a snapshot can carry
pub const MAX_ENTRIES: usize = u8::MAX as usize;

const FLAG_GATEWAY: u8 = 1 << 0;

/// One neighbor as advertised to other nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborSummary {
    /// Neighbor node id
    pub node_id: NodeId,
    /// Neighbor radio address
    pub hw_addr: HwAddr,
    /// Protocol version last seen from the neighbor
    pub version: u8,
    /// Last signal strength in dBm
    pub rssi: i8,
    /// Whether the neighbor is a gateway
    pub is_gateway: bool,
}

/// Encode a snapshot; entries past [`MAX_ENTRIES`] are left out
pub fn encode_table(entries: &[NeighborSummary]) -> Bytes {
    let count = entries.len().min(MAX_ENTRIES);
    let mut buf = BytesMut::with_capacity(1 + count * ENTRY_SIZE);
    buf.put_u8(count as u8);
    for entry in &entries[..count] {
        buf.put_u16_le(entry.node_id.0);
        buf.put_slice(entry.hw_addr.as_bytes());
        buf.put_u8(entry.version);
        buf.put_i8(entry.rssi);
        buf.put_u8(if entry.is_gateway { FLAG_GATEWAY } else { 0 });
    }
    buf.freeze()
}

/// Decode a snapshot; the length must match the declared count exactly
pub fn decode_table(mut buf: &[u8]) -> Result<Vec<NeighborSummary>, WireError> {
    if buf.is_empty() {
        return Err(WireError::Incomplete);
    }
    let count = buf.get_u8() as usize;
    if buf.len() != count * ENTRY_SIZE {
        return Err(WireError::Malformed);
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let node_id = NodeId(buf.get_u16_le());
        let mut hw = [0u8; HW_ADDR_LEN];
        buf.copy_to_slice(&mut hw);
        let version = buf.get_u8();
        let rssi = buf.get_i8();
        let flags = buf.get_u8();
        entries.push(NeighborSummary {
            node_id,
            hw_addr: HwAddr(hw),
            version,
            rssi,
            is_gateway: flags & FLAG_GATEWAY != 0,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(n: u8) -> NeighborSummary {
        NeighborSummary {
            node_id: NodeId(0x1000 + n as u16),
            hw_addr: HwAddr([0x24, 0x6f, 0x28, 0, 0x10, n]),
            version: 1,
            rssi: -40 - n as i8,
            is_gateway: n % 2 == 0,
        }
    }

    #[test]
    fn test_table_roundtrip() {
        let entries: Vec<_> = (0..5).map(summary).collect();
        let encoded = encode_table(&entries);
        assert_eq!(encoded.len(), 1 + 5 * ENTRY_SIZE);
        assert_eq!(decode_table(&encoded).unwrap(), entries);
    }

    #[test]
    fn test_empty_table() {
        let encoded = encode_table(&[]);
        assert_eq!(&encoded[..], &[0]);
        assert!(decode_table(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_full_registry_needs_chunking() {
        let entries: Vec<_> = (0..32).map(summary).collect();
        assert!(encode_table(&entries).len() > crate::MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        let encoded = encode_table(&[summary(1)]);
        assert_eq!(decode_table(&encoded[..encoded.len() - 1]), Err(WireError::Malformed));
        assert_eq!(decode_table(&[]), Err(WireError::Incomplete));
        assert_eq!(decode_table(&[2, 0, 0]), Err(WireError::Malformed));
    }
}
