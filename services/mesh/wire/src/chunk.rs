//! Message chunking for payloads larger than one frame.
//!
//! Every frame of one chunked message carries the same `seq`. The first
//! frame is marked [`Flags::CHUNK_START`], the last [`Flags::CHUNK_END`] and the
//! ones in between [`Flags::CHUNK_CONT`]. Reassembly is keyed by `(src, seq)`.

use crate::addr::NodeId;
use crate::codec::{build_packet, Packet};
use crate::header::{Flags, Header, PacketType, MAX_PAYLOAD_SIZE};
use crate::WireError;
use bytes::{Bytes, BytesMut};
use smallvec::SmallVec;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// Frames produced for one message; most messages fit in a handful
pub type Frames = SmallVec<[Bytes; 4]>;

/// Chunker for splitting large messages into frames
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
}

impl Chunker {
    /// Create a chunker that fills frames up to [`MAX_PAYLOAD_SIZE`]
    pub fn new() -> Self {
        Self {
            chunk_size: MAX_PAYLOAD_SIZE,
        }
    }

    /// Create a chunker with a smaller piece size
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(1, MAX_PAYLOAD_SIZE),
        }
    }

    /// Piece size in bytes
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split a payload into frames.
    ///
    /// A payload that fits in one frame comes back as exactly one frame with
    /// the header untouched, including an empty payload.
    pub fn chunk_message(&self, header: Header, payload: &[u8]) -> Result<Frames, WireError> {
        let mut frames = Frames::new();

        if payload.len() <= self.chunk_size {
            frames.push(build_packet(&header, payload)?);
            return Ok(frames);
        }

        let total_chunks = payload.len().div_ceil(self.chunk_size);
        for (chunk_no, piece) in payload.chunks(self.chunk_size).enumerate() {
            let marker = if chunk_no == 0 {
                Flags::CHUNK_START
            } else if chunk_no == total_chunks - 1 {
                Flags::CHUNK_END
            } else {
                Flags::CHUNK_CONT
            };
            frames.push(build_packet(&header.with_flags(marker), piece)?);
        }

        Ok(frames)
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new()
    }
}

/// Limits for in-flight reassembly
#[derive(Debug, Clone, Copy)]
pub struct ReassemblyLimits {
    /// How long a series may stay incomplete, in milliseconds
    pub lifetime_ms: u32,
    /// Maximum number of series held at once
    pub max_series: usize,
    /// Maximum reassembled message size in bytes
    pub max_message: usize,
}

impl Default for ReassemblyLimits {
    fn default() -> Self {
        Self {
            lifetime_ms: 5_000,
            max_series: 8,
            max_message: 4096,
        }
    }
}

#[derive(Debug)]
struct Partial {
    typ: PacketType,
    data: BytesMut,
    started_ms: u32,
}

/// Reassembler for collecting chunks into complete messages
#[derive(Debug)]
pub struct Reassembler {
    series: HashMap<(NodeId, u16), Partial>,
    limits: ReassemblyLimits,
}

impl Reassembler {
    /// Create a reassembler with default limits
    pub fn new() -> Self {
        Self::with_limits(ReassemblyLimits::default())
    }

    /// Create a reassembler with the given limits
    pub fn with_limits(limits: ReassemblyLimits) -> Self {
        Self {
            series: HashMap::new(),
            limits,
        }
    }

    /// Number of incomplete series
    pub fn in_flight(&self) -> usize {
        self.series.len()
    }

    /// Add a chunk and return the whole message once its END frame arrives.
    ///
    /// `now_ms` is a wrapping millisecond tick used only to age series.
    pub fn add_chunk(&mut self, packet: &Packet, now_ms: u32) -> Option<Bytes> {
        let flags = packet.header.flags;
        if !flags.is_chunk() {
            return None;
        }

        let key = (packet.header.src, packet.header.seq);

        if flags.contains(Flags::CHUNK_START) {
            if self.series.remove(&key).is_some() {
                debug!(
                    "Restarting chunk series from {} seq {}",
                    key.0, key.1
                );
            }
            self.make_room(now_ms);
            self.series.insert(
                key,
                Partial {
                    typ: packet.header.typ,
                    data: BytesMut::new(),
                    started_ms: now_ms,
                },
            );
        }

        let Some(partial) = self.series.get_mut(&key) else {
            trace!(
                "Dropping orphan chunk from {} seq {}",
                key.0, key.1
            );
            return None;
        };

        if partial.typ != packet.header.typ {
            debug!(
                "Chunk type changed mid-series from {} seq {}, abandoning",
                key.0, key.1
            );
            self.series.remove(&key);
            return None;
        }

        if partial.data.len() + packet.payload.len() > self.limits.max_message {
            warn!(
                "Chunk series from {} seq {} exceeds {} bytes, abandoning",
                key.0, key.1, self.limits.max_message
            );
            self.series.remove(&key);
            return None;
        }

        partial.data.extend_from_slice(&packet.payload);

        if flags.contains(Flags::CHUNK_END) {
            return self.series.remove(&key).map(|p| p.data.freeze());
        }

        None
    }

    /// Drop series older than the configured lifetime, returning how many
    pub fn expire(&mut self, now_ms: u32) -> usize {
        let lifetime = self.limits.lifetime_ms;
        let before = self.series.len();
        self.series.retain(|(src, seq), partial| {
            let keep = now_ms.wrapping_sub(partial.started_ms) <= lifetime;
            if !keep {
                debug!("Expired chunk series from {} seq {}", src, seq);
            }
            keep
        });
        before - self.series.len()
    }

    fn make_room(&mut self, now_ms: u32) {
        if self.series.len() < self.limits.max_series {
            return;
        }
        let oldest = self
            .series
            .iter()
            .max_by_key(|(_, p)| now_ms.wrapping_sub(p.started_ms))
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            debug!("Evicting chunk series from {} seq {}", key.0, key.1);
            self.series.remove(&key);
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_packet;

    fn data_header(src: u16, seq: u16) -> Header {
        Header::new(PacketType::Data, NodeId(src), NodeId(2), seq).with_flags(Flags::UNICAST)
    }

    fn parsed(frames: &Frames) -> Vec<Packet> {
        frames
            .iter()
            .map(|f| parse_packet(f.clone()).unwrap())
            .collect()
    }

    #[test]
    fn test_small_payload_single_frame() {
        let chunker = Chunker::new();
        let header = data_header(1, 7);

        let frames = chunker.chunk_message(header, b"hello").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], build_packet(&header, b"hello").unwrap());

        let exact = vec![1u8; MAX_PAYLOAD_SIZE];
        let frames = chunker.chunk_message(header, &exact).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(!parsed(&frames)[0].flags().is_chunk());

        assert_eq!(chunker.chunk_message(header, b"").unwrap().len(), 1);
    }

    #[test]
    fn test_three_and_a_half_frames() {
        let payload: Vec<u8> = (0..MAX_PAYLOAD_SIZE * 7 / 2).map(|i| i as u8).collect();
        let frames = Chunker::new()
            .chunk_message(data_header(1, 300), &payload)
            .unwrap();
        assert_eq!(frames.len(), 4);

        let packets = parsed(&frames);
        assert!(packets[0].flags().contains(Flags::CHUNK_START));
        assert!(packets[1].flags().contains(Flags::CHUNK_CONT));
        assert!(packets[2].flags().contains(Flags::CHUNK_CONT));
        assert!(packets[3].flags().contains(Flags::CHUNK_END));
        assert!(packets.iter().all(|p| p.header.seq == 300));
        assert!(packets.iter().all(|p| p.flags().contains(Flags::UNICAST)));

        let joined: Vec<u8> = packets.iter().flat_map(|p| p.payload.to_vec()).collect();
        assert_eq!(joined, payload);
    }

    #[test]
    fn test_two_chunks_have_no_continuation() {
        let payload = vec![9u8; MAX_PAYLOAD_SIZE + 1];
        let packets = parsed(
            &Chunker::new()
                .chunk_message(data_header(1, 1), &payload)
                .unwrap(),
        );
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].flags() & Flags::CHUNK_MASK, Flags::CHUNK_START);
        assert_eq!(packets[1].flags() & Flags::CHUNK_MASK, Flags::CHUNK_END);
        assert_eq!(packets[1].payload.len(), 1);
    }

    #[test]
    fn test_custom_chunk_size() {
        let chunker = Chunker::with_chunk_size(100);
        assert_eq!(chunker.chunk_size(), 100);
        assert_eq!(Chunker::with_chunk_size(0).chunk_size(), 1);
        assert_eq!(
            Chunker::with_chunk_size(MAX_PAYLOAD_SIZE + 50).chunk_size(),
            MAX_PAYLOAD_SIZE
        );

        let payload: Vec<u8> = (0..250).map(|i| i as u8).collect();
        let packets = parsed(&chunker.chunk_message(data_header(3, 4), &payload).unwrap());
        let sizes: Vec<usize> = packets.iter().map(|p| p.payload.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);

        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.add_chunk(&packets[0], 0), None);
        assert_eq!(reassembler.add_chunk(&packets[1], 0), None);
        assert_eq!(&reassembler.add_chunk(&packets[2], 0).unwrap()[..], &payload[..]);
    }

    #[test]
    fn test_reassembly() {
        let payload: Vec<u8> = (0..600).map(|i| (i % 251) as u8).collect();
        let packets = parsed(
            &Chunker::new()
                .chunk_message(data_header(5, 11), &payload)
                .unwrap(),
        );

        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.add_chunk(&packets[0], 0), None);
        assert_eq!(reassembler.add_chunk(&packets[1], 10), None);
        assert_eq!(reassembler.in_flight(), 1);
        let message = reassembler.add_chunk(&packets[2], 20).unwrap();
        assert_eq!(&message[..], &payload[..]);
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn test_reassembly_keys_by_sender() {
        let payload_a = vec![0xAA; 300];
        let payload_b = vec![0xBB; 300];
        let a = parsed(&Chunker::new().chunk_message(data_header(1, 4), &payload_a).unwrap());
        let b = parsed(&Chunker::new().chunk_message(data_header(2, 4), &payload_b).unwrap());

        let mut reassembler = Reassembler::new();
        reassembler.add_chunk(&a[0], 0);
        reassembler.add_chunk(&b[0], 0);
        assert_eq!(reassembler.add_chunk(&b[1], 0).unwrap(), Bytes::from(payload_b));
        assert_eq!(reassembler.add_chunk(&a[1], 0).unwrap(), Bytes::from(payload_a));
    }

    #[test]
    fn test_orphan_chunks_dropped() {
        let packets = parsed(
            &Chunker::new()
                .chunk_message(data_header(1, 2), &[0u8; 600])
                .unwrap(),
        );
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.add_chunk(&packets[1], 0), None);
        assert_eq!(reassembler.add_chunk(&packets[2], 0), None);
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn test_unchunked_packet_ignored() {
        let frames = Chunker::new().chunk_message(data_header(1, 2), b"hi").unwrap();
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.add_chunk(&parsed(&frames)[0], 0), None);
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn test_expiry_and_bounds() {
        let limits = ReassemblyLimits {
            lifetime_ms: 100,
            max_series: 2,
            max_message: 300,
        };
        let mut reassembler = Reassembler::with_limits(limits);
        let first = |src: u16| {
            parsed(&Chunker::new().chunk_message(data_header(src, 0), &[0u8; 400]).unwrap())
        };

        reassembler.add_chunk(&first(1)[0], u32::MAX - 10);
        reassembler.add_chunk(&first(2)[0], 20);
        reassembler.add_chunk(&first(3)[0], 30);
        assert_eq!(reassembler.in_flight(), 2);

        // src 1 was evicted to admit src 3; src 2 expires, src 3 survives
        assert_eq!(reassembler.expire(125), 1);
        assert_eq!(reassembler.in_flight(), 1);

        // 239 + 161 exceeds max_message
        let too_big = first(3);
        assert_eq!(reassembler.add_chunk(&too_big[1], 126), None);
        assert_eq!(reassembler.in_flight(), 0);
    }
}
