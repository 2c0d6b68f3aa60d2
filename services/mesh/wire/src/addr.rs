//! Hardware and mesh-layer addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a radio link address in bytes
pub const HW_ADDR_LEN: usize = 6;

/// Radio link address (6 bytes, MAC style)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HwAddr(pub [u8; HW_ADDR_LEN]);

impl HwAddr {
    /// All-ones broadcast address
    pub const BROADCAST: Self = Self([0xFF; HW_ADDR_LEN]);

    /// Build an address from a slice, `None` unless it is exactly 6 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HW_ADDR_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Whether this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Raw address bytes
    pub fn as_bytes(&self) -> &[u8; HW_ADDR_LEN] {
        &self.0
    }
}

impl fmt::Display for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HwAddr({})", self)
    }
}

impl From<[u8; HW_ADDR_LEN]> for HwAddr {
    fn from(bytes: [u8; HW_ADDR_LEN]) -> Self {
        Self(bytes)
    }
}

/// 16-bit mesh-layer node address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u16);

impl NodeId {
    /// Broadcast destination
    pub const BROADCAST: Self = Self(0xFFFF);

    /// Whether this is the broadcast id
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

impl From<u16> for NodeId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hw_addr_display() {
        let addr = HwAddr([0x24, 0x6f, 0x28, 0x0a, 0xbc, 0x01]);
        assert_eq!(addr.to_string(), "24:6f:28:0a:bc:01");
        assert!(!addr.is_broadcast());
        assert!(HwAddr::BROADCAST.is_broadcast());
    }

    #[test]
    fn test_hw_addr_from_slice() {
        assert_eq!(
            HwAddr::from_slice(&[1, 2, 3, 4, 5, 6]),
            Some(HwAddr([1, 2, 3, 4, 5, 6]))
        );
        assert_eq!(HwAddr::from_slice(&[1, 2, 3]), None);
        assert_eq!(HwAddr::from_slice(&[0; 7]), None);
    }

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId(0xBC01).to_string(), "0xBC01");
        assert!(NodeId::BROADCAST.is_broadcast());
    }
}
