// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Frame codec: fixed-size checksummed frames and the legacy CRC16.
//!
//! Frame layout (1027 bytes):
//! - SYNC (1 byte): 0x01
//! - DATA (1024 bytes): payload, the last frame right-padded with FILL (0x14)
//! - CRC (2 bytes): CRC16 of the unpadded data, high byte first

use std::fmt;
use thiserror::Error;
use crate::protocol::{DATA_INDEX, DATA_SIZE, FILL, FRAME_SIZE, SYNC};

/// Generator polynomial x^16 + x^15 + x^2 + 1
const POLY: u16 = 0x8005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CorruptionError {
    #[error("frame is {0} bytes, expected 1027")]
    BadLength(usize),

    #[error("frame starts with 0x{0:02X} instead of the sync marker")]
    MissingSync(u8),

    #[error("checksum mismatch: frame carries 0x{expected:04X}, data hashes to 0x{actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },
}

/// One wire frame, always exactly `FRAME_SIZE` bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; FRAME_SIZE],
}

impl Frame {
    fn new(chunk: &[u8]) -> Self {
        debug_assert!(chunk.len() <= DATA_SIZE);

        let mut bytes = [FILL; FRAME_SIZE];
        bytes[0] = SYNC;
        bytes[DATA_INDEX..DATA_INDEX + chunk.len()].copy_from_slice(chunk);
        bytes[FRAME_SIZE - 2..].copy_from_slice(&crc16(chunk).to_be_bytes());

        Frame { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn checksum(&self) -> u16 {
        frame_checksum(&self.bytes)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = &self.bytes[DATA_INDEX..DATA_INDEX + DATA_SIZE];
        let real = data.iter().filter(|&&b| b != FILL).count();
        f.debug_struct("Frame")
            .field("data_bytes", &real)
            .field("checksum", &format_args!("0x{:04X}", self.checksum()))
            .finish()
    }
}

/// CRC16 over `data` as the legacy peers compute it.
///
/// Bits are fed least-significant first into a 16-bit shift register, the
/// register is flushed with 16 zero bits, and the result is bit-reversed.
/// Equivalent to CRC-16/ARC.
pub fn crc16(data: &[u8]) -> u16 {
    let mut reg: u16 = 0;

    for &byte in data {
        for bit in 0..8 {
            let carry = reg & 0x8000 != 0;
            reg = (reg << 1) | u16::from((byte >> bit) & 1);
            if carry {
                reg ^= POLY;
            }
        }
    }

    // push out the last 16 bits
    for _ in 0..16 {
        let carry = reg & 0x8000 != 0;
        reg <<= 1;
        if carry {
            reg ^= POLY;
        }
    }

    reg.reverse_bits()
}

/// Split a staged payload into frames.
///
/// The payload must not contain FILL; `staging::stage_text` guarantees this.
/// An empty payload still yields one frame, all fill.
pub fn packetize(payload: &[u8]) -> Vec<Frame> {
    if payload.is_empty() {
        return vec![Frame::new(&[])];
    }

    payload.chunks(DATA_SIZE).map(Frame::new).collect()
}

/// Checksum carried in the trailer of a raw frame. Caller ensures the length.
pub fn frame_checksum(raw: &[u8]) -> u16 {
    u16::from_be_bytes([raw[FRAME_SIZE - 2], raw[FRAME_SIZE - 1]])
}

/// Check a raw frame and recover the fragment it carries.
pub fn validate_frame(raw: &[u8]) -> Result<Vec<u8>, CorruptionError> {
    if raw.len() != FRAME_SIZE {
        return Err(CorruptionError::BadLength(raw.len()));
    }
    if raw[0] != SYNC {
        return Err(CorruptionError::MissingSync(raw[0]));
    }

    let fragment: Vec<u8> = raw[DATA_INDEX..DATA_INDEX + DATA_SIZE]
        .iter()
        .copied()
        .filter(|&b| b != FILL)
        .collect();

    let expected = frame_checksum(raw);
    let actual = crc16(&fragment);
    if expected != actual {
        return Err(CorruptionError::ChecksumMismatch { expected, actual });
    }

    Ok(fragment)
}

/// Validate every frame in order and concatenate the fragments.
#[cfg(test)]
pub fn reassemble<'a, I>(frames: I) -> Result<Vec<u8>, CorruptionError>
where
    I: IntoIterator<Item = &'a Frame>,
{
    let mut payload = Vec::new();
    for frame in frames {
        payload.extend(validate_frame(frame.as_bytes())?);
    }
    Ok(payload)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn staged_bytes() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>().prop_filter("fill is reserved", |b| *b != FILL), 0..3 * DATA_SIZE)
    }

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0xBB3D);
    }

    #[test]
    fn test_crc16_known_values() {
        assert_eq!(crc16(b""), 0x0000);
        assert_eq!(crc16(b"A"), 0x30C0);
        assert_eq!(crc16(b"HELLO"), 0xE141);
    }

    #[test]
    fn test_hello_frame_layout() {
        let frames = packetize(b"HELLO");
        assert_eq!(frames.len(), 1);

        let packet = frames[0].as_bytes();
        assert_eq!(packet.len(), FRAME_SIZE);
        assert_eq!(packet[0], 0x01);
        assert_eq!(&packet[1..6], b"HELLO");
        assert!(packet[6..1025].iter().all(|&b| b == 0x14));
        assert_eq!(&packet[1025..1027], &crc16(b"HELLO").to_be_bytes());
    }

    #[test]
    fn test_empty_payload_single_fill_frame() {
        let frames = packetize(b"");
        assert_eq!(frames.len(), 1);

        let packet = frames[0].as_bytes();
        assert_eq!(packet[0], SYNC);
        assert!(packet[DATA_INDEX..DATA_INDEX + DATA_SIZE].iter().all(|&b| b == FILL));
        assert_eq!(frames[0].checksum(), crc16(&[]));
        assert_eq!(validate_frame(packet), Ok(Vec::new()));
    }

    #[test]
    fn test_exact_multiple_has_no_fill() {
        let payload: Vec<u8> = (0..2 * DATA_SIZE).map(|i| b'a' + (i % 26) as u8).collect();
        let frames = packetize(&payload);
        assert_eq!(frames.len(), 2);

        for frame in &frames {
            assert!(!frame.as_bytes()[DATA_INDEX..DATA_INDEX + DATA_SIZE].contains(&FILL));
        }
        assert_eq!(reassemble(&frames).unwrap(), payload);
    }

    #[test]
    fn test_last_frame_padded() {
        let payload = vec![b'x'; DATA_SIZE + 10];
        let frames = packetize(&payload);
        assert_eq!(frames.len(), 2);

        let last = frames[1].as_bytes();
        assert_eq!(&last[DATA_INDEX..DATA_INDEX + 10], &[b'x'; 10]);
        assert!(last[DATA_INDEX + 10..DATA_INDEX + DATA_SIZE].iter().all(|&b| b == FILL));
        assert_eq!(frames[1].checksum(), crc16(&[b'x'; 10]));
    }

    #[test]
    fn test_fill_stripped_anywhere() {
        let mut raw = packetize(b"ABCD").remove(0).as_bytes().to_vec();
        // move the fill between real bytes; the fragment is unchanged
        raw[3] = FILL;
        raw[4] = b'C';
        raw[5] = b'D';
        assert_eq!(validate_frame(&raw), Ok(b"ABCD".to_vec()));
    }

    #[test]
    fn test_missing_sync_rejected() {
        let mut raw = packetize(b"data").remove(0).as_bytes().to_vec();
        raw[0] = 0x16;
        assert_eq!(validate_frame(&raw), Err(CorruptionError::MissingSync(0x16)));
    }

    #[test]
    fn test_bad_length_rejected() {
        let raw = packetize(b"data").remove(0).as_bytes().to_vec();
        assert_eq!(validate_frame(&raw[..FRAME_SIZE - 1]), Err(CorruptionError::BadLength(FRAME_SIZE - 1)));
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let mut raw = packetize(b"data").remove(0).as_bytes().to_vec();
        raw[FRAME_SIZE - 1] ^= 0xFF;
        assert!(matches!(validate_frame(&raw), Err(CorruptionError::ChecksumMismatch { .. })));
    }

    proptest! {
        #[test]
        fn prop_round_trip(payload in staged_bytes()) {
            let frames = packetize(&payload);
            prop_assert_eq!(frames.len(), payload.len().div_ceil(DATA_SIZE).max(1));
            for frame in &frames {
                prop_assert_eq!(frame.as_bytes().len(), FRAME_SIZE);
                prop_assert_eq!(frame.as_bytes()[0], SYNC);
            }
            prop_assert_eq!(reassemble(&frames).unwrap(), payload);
        }

        #[test]
        fn prop_bit_flip_detected(
            payload in prop::collection::vec(b' '..=b'~', 1..DATA_SIZE),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut raw = packetize(&payload).remove(0).as_bytes().to_vec();
            // flip a bit inside the real data, keeping the byte distinct from FILL
            let pos = DATA_INDEX + index.index(payload.len());
            let flipped = raw[pos] ^ (1 << bit);
            prop_assume!(flipped != FILL);
            raw[pos] = flipped;
            let rejected = matches!(validate_frame(&raw), Err(CorruptionError::ChecksumMismatch { .. }));
            prop_assert!(rejected, "flipped bit {} at {} went undetected", bit, pos);
        }
    }
}
