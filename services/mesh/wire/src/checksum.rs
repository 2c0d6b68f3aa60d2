//! CRC-8 header checksum (polynomial 0x07, init 0x00, no reflection).
//!
//! The default path looks every byte up in a 256-entry table generated at
//! compile time. Building with the `bitwise-crc` feature switches the free
//! functions to a shift-and-xor loop that needs no table, for parts where
//! 256 bytes of flash/RAM matter more than CPU time. [`Crc8`] lets the mode be
//! picked at runtime instead.
//!
//! Any single-byte alteration of the covered span is detected. Multi-byte
//! corruption escapes detection with probability of roughly 1/256, which is
//! inherent to an 8-bit check.

use bytes::{BufMut, Bytes, BytesMut};

/// Generator polynomial
pub const POLY: u8 = 0x07;

/// Initial register value
pub const INIT: u8 = 0x00;

const fn make_table(poly: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static TABLE: [u8; 256] = make_table(POLY);

fn update_table(mut crc: u8, data: &[u8]) -> u8 {
    for &b in data {
        crc = TABLE[(crc ^ b) as usize];
    }
    crc
}

fn update_bitwise(mut crc: u8, data: &[u8]) -> u8 {
    for &b in data {
        crc ^= b;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Compute the checksum of `data` starting from [`INIT`]
pub fn compute(data: &[u8]) -> u8 {
    update(INIT, data)
}

/// Continue a checksum from a previous value
#[cfg(not(feature = "bitwise-crc"))]
pub fn update(crc: u8, data: &[u8]) -> u8 {
    update_table(crc, data)
}

/// Continue a checksum from a previous value
#[cfg(feature = "bitwise-crc")]
pub fn update(crc: u8, data: &[u8]) -> u8 {
    update_bitwise(crc, data)
}

/// Append the checksum of the current buffer contents to the buffer
pub fn append(buf: &mut BytesMut) -> u8 {
    let crc = compute(buf);
    buf.put_u8(crc);
    crc
}

/// Copy `data` and append its checksum byte
pub fn with_checksum(data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(data.len() + 1);
    buf.put_slice(data);
    append(&mut buf);
    buf.freeze()
}

/// Check that the last byte is the checksum of everything before it
pub fn verify(data_with_crc: &[u8]) -> bool {
    match data_with_crc.split_last() {
        Some((&expected, body)) => compute(body) == expected,
        None => false,
    }
}

/// How a [`Crc8`] computes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Crc8Mode {
    /// Table lookup per byte
    #[default]
    Table,
    /// Shift and xor per bit, no table
    Bitwise,
}

/// Streaming CRC-8 state
#[derive(Debug, Clone)]
pub struct Crc8 {
    crc: u8,
    init: u8,
    mode: Crc8Mode,
}

impl Crc8 {
    /// Create a new streaming checksum
    pub fn new(mode: Crc8Mode) -> Self {
        Self::with_init(INIT, mode)
    }

    /// Create a streaming checksum with a custom initial value
    pub fn with_init(init: u8, mode: Crc8Mode) -> Self {
        Self {
            crc: init,
            init,
            mode,
        }
    }

    /// Feed more bytes
    pub fn update(&mut self, data: &[u8]) {
        self.crc = match self.mode {
            Crc8Mode::Table => update_table(self.crc, data),
            Crc8Mode::Bitwise => update_bitwise(self.crc, data),
        };
    }

    /// Current checksum value
    pub fn digest(&self) -> u8 {
        self.crc
    }

    /// Return to the initial value
    pub fn reset(&mut self) {
        self.crc = self.init;
    }
}

impl Default for Crc8 {
    fn default() -> Self {
        Self::new(Crc8Mode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SMBUS: crc::Crc<u8> = crc::Crc::<u8>::new(&crc::CRC_8_SMBUS);

    #[test]
    fn test_check_value() {
        // Standard CRC-8 (SMBus) check value
        assert_eq!(compute(b"123456789"), 0xF4);
        assert_eq!(compute(&[]), 0x00);
    }

    #[test]
    fn test_matches_reference_crate() {
        let samples: [&[u8]; 4] = [
            b"",
            b"\x01\x03\x01\x02\xff\xff\x10\x00\x0a",
            b"the quick brown fox",
            &[0xFF; 64],
        ];
        for sample in samples {
            assert_eq!(compute(sample), SMBUS.checksum(sample));
        }
    }

    #[test]
    fn test_table_and_bitwise_agree() {
        let data: Vec<u8> = (0..=255u8).collect();
        assert_eq!(update_table(0, &data), update_bitwise(0, &data));
        assert_eq!(update_table(0x5A, &data), update_bitwise(0x5A, &data));
    }

    #[test]
    fn test_streaming_update() {
        let data = b"hello mesh network";
        let (a, b) = data.split_at(7);
        assert_eq!(update(compute(a), b), compute(data));

        let mut streaming = Crc8::new(Crc8Mode::Bitwise);
        streaming.update(a);
        streaming.update(b);
        assert_eq!(streaming.digest(), compute(data));

        streaming.reset();
        assert_eq!(streaming.digest(), INIT);
    }

    #[test]
    fn test_append_and_verify() {
        let framed = with_checksum(b"\x01\x01\x02\x00");
        assert_eq!(framed.len(), 5);
        assert!(verify(&framed));
        assert!(!verify(&[]));
        assert!(verify(&[0x00]));
    }

    #[test]
    fn test_single_bit_flips_detected() {
        let framed = with_checksum(&[0x01, 0x03, 0x34, 0x12, 0xFF, 0xFF, 0x07, 0x00, 0x0A, 0x05]);
        for byte in 0..framed.len() {
            for bit in 0..8 {
                let mut corrupted = framed.to_vec();
                corrupted[byte] ^= 1 << bit;
                assert!(!verify(&corrupted), "flip at byte {} bit {}", byte, bit);
            }
        }
    }

    proptest! {
        #[test]
        fn test_matches_reference_crc(data in prop::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(compute(&data), SMBUS.checksum(&data));
        }

        #[test]
        fn test_any_single_bit_flip_detected(
            data in prop::collection::vec(any::<u8>(), 1..64),
            pos in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut framed = with_checksum(&data).to_vec();
            let byte = pos.index(framed.len());
            framed[byte] ^= 1 << bit;
            prop_assert!(!verify(&framed));
        }
    }
}
