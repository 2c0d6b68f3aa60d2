//! Packet building and parsing.
//!
//! This is the only place that knows how header, checksum and payload are laid
//! out in a frame. Parsing is expected to fail often on a noisy link and never
//! panics; callers drop whatever comes back as `Err`.

use crate::addr::NodeId;
use crate::checksum;
use crate::header::{
    Flags, Header, PacketType, CHECKSUM_SIZE, HEADER_SIZE, MAX_PAYLOAD_SIZE, MESH_VERSION,
};
use crate::WireError;
use bytes::{BufMut, Bytes, BytesMut};

/// A validated packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Decoded header
    pub header: Header,
    /// Payload bytes
    pub payload: Bytes,
}

impl Packet {
    /// Packet type
    pub fn typ(&self) -> PacketType {
        self.header.typ
    }

    /// Source node
    pub fn src(&self) -> NodeId {
        self.header.src
    }

    /// Flags
    pub fn flags(&self) -> Flags {
        self.header.flags
    }
}

/// Builder for a single frame
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    header: Header,
    payload: Bytes,
}

impl PacketBuilder {
    /// Start a frame of the given type
    pub fn new(typ: PacketType, src: NodeId, dst: NodeId, seq: u16) -> Self {
        Self::from_header(Header::new(typ, src, dst, seq))
    }

    /// Start from an existing header
    pub fn from_header(header: Header) -> Self {
        Self {
            header,
            payload: Bytes::new(),
        }
    }

    /// Set the TTL
    pub fn ttl(mut self, ttl: u8) -> Self {
        self.header.ttl = ttl;
        self
    }

    /// Add flags
    pub fn flags(mut self, flags: Flags) -> Self {
        self.header.flags |= flags;
        self
    }

    /// Set the payload
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Header as configured so far
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Encode the frame
    pub fn build(self) -> Result<Bytes, WireError> {
        build_packet(&self.header, &self.payload)
    }
}

/// Serialize header, header checksum and payload into one frame.
///
/// `plen` is taken from the payload; the value in `header` is ignored.
pub fn build_packet(header: &Header, payload: &[u8]) -> Result<Bytes, WireError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::Size(payload.len()));
    }

    let mut header = *header;
    header.plen = payload.len() as u8;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + CHECKSUM_SIZE + payload.len());
    header.encode(&mut buf);
    checksum::append(&mut buf);
    buf.put_slice(payload);

    Ok(buf.freeze())
}

/// Validate and decode a frame.
///
/// The checksum is checked before any field is interpreted. After that the
/// declared length must equal the trailing byte count and the version must
/// match [`MESH_VERSION`].
pub fn parse_packet(mut frame: Bytes) -> Result<Packet, WireError> {
    let framed_len = HEADER_SIZE + CHECKSUM_SIZE;
    if frame.len() < framed_len {
        return Err(WireError::Incomplete);
    }

    if !checksum::verify(&frame[..framed_len]) {
        return Err(WireError::HdrCsum);
    }

    let header = Header::decode(&frame[..HEADER_SIZE])?;
    let payload = frame.split_off(framed_len);

    if header.plen as usize != payload.len() {
        return Err(WireError::Length {
            declared: header.plen,
            actual: payload.len(),
        });
    }

    if header.version != MESH_VERSION {
        return Err(WireError::Version(header.version));
    }

    Ok(Packet { header, payload })
}
