// This file is part of Minipack.
//
// Minipack is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Minipack is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Minipack.  If not, see <http://www.gnu.org/licenses/>.

//! Packet layer and compression pipeline.
//!
//! The match finder's output is coded as LZMA-style packets, with every
//! field routed to one of five bitstreams by its role:
//!
//! ```text
//! packet        TYPE prefix   SIZE      OFFSET    LITERAL_MSB  LITERAL
//! LIT           0                                 1 bit        7 bits
//! MATCH         10            length    distance
//! SHORTREP      1100
//! LONGREP0      1101          length
//! LONGREP1      1110          length
//! LONGREP2      11110         length
//! LONGREP3      11111         length
//! ```
//!
//! Splitting by role keeps each stream self-similar, which is what lets
//! the downstream adaptive arithmetic coder squeeze them. Literals shed
//! their top bit into a separate stream as a difference against the
//! previous literal's top bit; for machine code and text that bit flips
//! rarely and codes to almost nothing.

use crate::arith::arith_encode;
use crate::bits::BitEmitter;
use crate::model::MAX_WINDOW_SIZE;
use crate::repeats::{find_repeats, Occurrence, RepeatSink};
use crate::{LzaError, LENGTH_TAIL_BITS, MAX_MATCH_LEN};
use anyhow::{ensure, Result};
use log::trace;

/// Byte sizes and packet counts gathered while compressing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompressedSizes {
    /// Final output size, including the window-size prefix.
    pub compressed: usize,
    /// Size of the LZ intermediate (header plus the five streams).
    pub lz: usize,

    pub types: usize,
    pub literal_msbs: usize,
    pub literals: usize,
    pub sizes: usize,
    pub offsets: usize,

    pub lit_packets: usize,
    pub match_packets: usize,
    pub shortrep_packets: usize,
    pub longrep_packets: [usize; 4],
}

/// A finished compression: the output bytes plus the statistics.
#[derive(Debug)]
pub struct Compressed {
    pub data: Vec<u8>,
    pub sizes: CompressedSizes,
}

/// Worst-case output size a caller must be prepared to hold for an input
/// of `src_size` bytes.
pub fn estimate_compress_size(src_size: usize) -> usize {
    4 * src_size.max(4096)
}

pub(crate) fn emit_length(emitter: &mut BitEmitter, length: u32) {
    debug_assert!(length >= 2 && length as usize <= MAX_MATCH_LEN);

    if length <= 9 {
        emitter.emit_bits(0, 1);
        emitter.emit_bits(u64::from(length - 2), 3);
    } else if length <= 17 {
        emitter.emit_bits(0b10, 2);
        emitter.emit_bits(u64::from(length - 10), 3);
    } else {
        emitter.emit_bits(0b11, 2);
        emitter.emit_bits(u64::from(length - 18), LENGTH_TAIL_BITS);
    }
}

/// Distances are stored biased by one. Values 0 and 1 fit directly in the
/// 6-bit slot; larger values drop their leading one-bit and carry its
/// position in the slot's upper bits.
pub(crate) fn emit_distance(emitter: &mut BitEmitter, distance: u64) {
    debug_assert!(distance >= 1 && distance <= 1 << 31);

    let value = distance - 1;

    if value < 2 {
        emitter.emit_bits(value, 6);
    } else {
        let top = 63 - value.leading_zeros();
        let field = (value & !(1u64 << top)) | (u64::from(top) << top);
        emitter.emit_bits(field, top + 5);
    }
}

struct PacketStreams {
    types: BitEmitter,
    literal_msbs: BitEmitter,
    literals: BitEmitter,
    sizes: BitEmitter,
    offsets: BitEmitter,
    prev_lit: u8,
    stats: CompressedSizes,
}

impl PacketStreams {
    fn new() -> Self {
        Self {
            types: BitEmitter::new(),
            literal_msbs: BitEmitter::new(),
            literals: BitEmitter::new(),
            sizes: BitEmitter::new(),
            offsets: BitEmitter::new(),
            prev_lit: 0,
            stats: CompressedSizes::default(),
        }
    }

    /// Tail-flush every stream, then assemble the LZ intermediate: a
    /// header carrying the five stream sizes followed by the streams in
    /// fixed order.
    fn finish(mut self) -> (Vec<u8>, CompressedSizes) {
        self.stats.types = self.types.emit_tail();
        self.stats.literal_msbs = self.literal_msbs.emit_tail();
        self.stats.literals = self.literals.emit_tail();
        self.stats.sizes = self.sizes.emit_tail();
        self.stats.offsets = self.offsets.emit_tail();

        // Sizes ride the distance encoding, which starts at one; streams
        // can be empty, hence the bias.
        let mut header = BitEmitter::new();
        for stream_size in [
            self.stats.types,
            self.stats.literal_msbs,
            self.stats.literals,
            self.stats.sizes,
            self.stats.offsets,
        ] {
            emit_distance(&mut header, stream_size as u64 + 1);
        }
        header.emit_tail();

        let mut blob = header.into_bytes();
        blob.extend_from_slice(self.types.as_bytes());
        blob.extend_from_slice(self.literal_msbs.as_bytes());
        blob.extend_from_slice(self.literals.as_bytes());
        blob.extend_from_slice(self.sizes.as_bytes());
        blob.extend_from_slice(self.offsets.as_bytes());

        self.stats.lz = blob.len();

        (blob, self.stats)
    }
}

impl RepeatSink for PacketStreams {
    fn literal(&mut self, buf: &[u8], pos: usize, count: usize) {
        for &byte in &buf[pos..pos + count] {
            self.types.emit_bits(0, 1);
            self.literal_msbs
                .emit_bits(u64::from((byte ^ self.prev_lit) >> 7), 1);
            self.literals.emit_bits(u64::from(byte & 0x7F), 7);
            self.prev_lit = byte;
            self.stats.lit_packets += 1;
        }
    }

    fn matched(&mut self, _buf: &[u8], _pos: usize, occurrence: Occurrence) {
        match occurrence.slot {
            None => {
                self.types.emit_bits(0b10, 2);
                emit_length(&mut self.sizes, occurrence.length);
                emit_distance(&mut self.offsets, u64::from(occurrence.distance));
                self.stats.match_packets += 1;
            }
            Some(slot) if occurrence.length == 1 => {
                debug_assert_eq!(slot, 0);
                self.types.emit_bits(0b1100, 4);
                self.stats.shortrep_packets += 1;
            }
            Some(slot) => {
                let (prefix, bits) = match slot {
                    0 => (0b1101, 4),
                    1 => (0b1110, 4),
                    2 => (0b11110, 5),
                    _ => (0b11111, 5),
                };
                self.types.emit_bits(prefix, bits);
                emit_length(&mut self.sizes, occurrence.length);
                self.stats.longrep_packets[slot] += 1;
            }
        }
    }
}

/// Run only the LZ stage: match, packetize and split into streams, and
/// return the LZ intermediate with its statistics.
pub fn lz_compress(src: &[u8]) -> Result<(Vec<u8>, CompressedSizes)> {
    let mut packets = PacketStreams::new();
    find_repeats(src, &mut packets)?;
    Ok(packets.finish())
}

/// Compress `src` into a self-describing blob: a 16-bit little-endian
/// window size followed by the arithmetic-coded LZ intermediate. Empty
/// input compresses to empty output.
pub fn compress(src: &[u8], window_size: u32) -> Result<Compressed> {
    ensure!(
        window_size >= 1 && window_size <= MAX_WINDOW_SIZE,
        LzaError::InvalidWindowSize(window_size)
    );

    if src.is_empty() {
        return Ok(Compressed {
            data: Vec::new(),
            sizes: CompressedSizes::default(),
        });
    }

    let (blob, mut sizes) = lz_compress(src)?;

    let payload = arith_encode(&blob, window_size);

    let mut data = Vec::with_capacity(2 + payload.len());
    data.push(window_size as u8);
    data.push((window_size >> 8) as u8);
    data.extend_from_slice(&payload);

    sizes.compressed = data.len();

    trace!(
        "compressed {} -> lz {} -> {} bytes (window {})",
        src.len(),
        sizes.lz,
        sizes.compressed,
        window_size
    );

    Ok(Compressed { data, sizes })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitted(f: impl FnOnce(&mut BitEmitter)) -> Vec<u8> {
        let mut emitter = BitEmitter::new();
        f(&mut emitter);
        emitter.emit_tail();
        emitter.into_bytes()
    }

    #[test]
    fn length_field_bucket_boundaries() {
        // 2 -> '0 000', padded with the final zero bit.
        assert_eq!(emitted(|e| emit_length(e, 2)), &[0b0000_0000]);
        // 9 -> '0 111'.
        assert_eq!(emitted(|e| emit_length(e, 9)), &[0b0111_1111]);
        // 10 -> '10 000'.
        assert_eq!(emitted(|e| emit_length(e, 10)), &[0b1000_0000]);
        // 17 -> '10 111'.
        assert_eq!(emitted(|e| emit_length(e, 17)), &[0b1011_1111]);
        // 18 -> '11' + 11 zero bits.
        assert_eq!(emitted(|e| emit_length(e, 18)), &[0b1100_0000, 0b0000_0000]);
        // Format maximum -> '11' + 11 one bits.
        assert_eq!(
            emitted(|e| emit_length(e, MAX_MATCH_LEN as u32)),
            &[0b1111_1111, 0b1111_1111]
        );
    }

    #[test]
    fn distance_field_small_values() {
        assert_eq!(emitted(|e| emit_distance(e, 1)), &[0b0000_0000]);
        assert_eq!(emitted(|e| emit_distance(e, 2)), &[0b0000_0111]);
        // distance 3 -> value 2 -> slot '000010'.
        assert_eq!(emitted(|e| emit_distance(e, 3)), &[0b0000_1000]);
        // distance 4 -> value 3 -> slot '000011'.
        assert_eq!(emitted(|e| emit_distance(e, 4)), &[0b0000_1111]);
    }

    #[test]
    fn stream_sizes_add_up() {
        let (blob, sizes) = lz_compress(b"abcabcabcabcabc").unwrap();

        let streams =
            sizes.types + sizes.literal_msbs + sizes.literals + sizes.sizes + sizes.offsets;
        assert_eq!(sizes.lz, blob.len());
        assert!(sizes.lz > streams, "header must precede the streams");

        assert_eq!(sizes.lit_packets, 3);
        assert_eq!(sizes.match_packets, 1);
    }

    #[test]
    fn rejects_out_of_range_window() {
        assert!(compress(b"x", 0).is_err());
        assert!(compress(b"x", MAX_WINDOW_SIZE + 1).is_err());
        assert!(compress(b"x", 1).is_ok());
        assert!(compress(b"x", MAX_WINDOW_SIZE).is_ok());
    }

    #[test]
    fn output_is_deterministic() {
        let input: Vec<u8> = (0..2048u32).map(|i| (i * 31 % 251) as u8).collect();
        let first = compress(&input, 512).unwrap();
        let second = compress(&input, 512).unwrap();
        assert_eq!(first.data, second.data);
        assert_eq!(first.sizes, second.sizes);
    }

    #[test]
    fn window_size_prefix_is_little_endian() {
        let compressed = compress(b"abcabc", 0x0123).unwrap();
        assert_eq!(compressed.data[0], 0x23);
        assert_eq!(compressed.data[1], 0x01);
    }

    #[test]
    fn output_fits_the_estimate() {
        let mut state = 0x0DDBA11u32;
        let mut lcg = || {
            state = state.wrapping_mul(0x08088405).wrapping_add(1);
            (state >> 16) as u8
        };

        for len in [0usize, 1, 100, 5000] {
            let input: Vec<u8> = (0..len).map(|_| lcg()).collect();
            let compressed = compress(&input, 128).unwrap();
            assert!(compressed.data.len() <= estimate_compress_size(len));
        }
    }
}
