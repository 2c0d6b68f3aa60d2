//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Frame shorter than header plus checksum
    #[error("incomplete frame")]
    Incomplete,

    /// Header checksum mismatch
    #[error("hdr checksum mismatch")]
    HdrCsum,

    /// Declared payload length does not match the trailing byte count
    #[error("length mismatch: declared {declared}, actual {actual}")]
    Length {
        /// Value of the plen field
        declared: u8,
        /// Bytes actually following the header
        actual: usize,
    },

    /// Unsupported protocol version
    #[error("version unsupported: {0}")]
    Version(u8),

    /// Unknown packet type
    #[error("unknown type {0}")]
    Type(u8),

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Malformed payload structure
    #[error("malformed payload")]
    Malformed,
}
