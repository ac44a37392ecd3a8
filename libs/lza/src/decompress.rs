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

//! Decompression pipeline: the exact inverse of [`crate::compress`].
//!
//! The format carries no in-band integrity check, so a corrupt input can
//! produce garbage output; what this module guarantees is that it never
//! reads outside the input, never writes outside the destination, and
//! fails cleanly where corruption is structurally detectable (stream
//! sizes larger than the payload, match distances pointing before the
//! start of the output).

use crate::arith::arith_decode;
use crate::bits::BitStream;
use crate::model::MAX_WINDOW_SIZE;
use crate::repeats::push_distance;
use crate::{LzaError, LENGTH_TAIL_BITS};
use anyhow::{ensure, Result};
use log::trace;

fn read_length(stream: &mut BitStream) -> u32 {
    if stream.get_one_bit() == 0 {
        return 2 + stream.get_bits(3);
    }
    if stream.get_one_bit() == 0 {
        return 10 + stream.get_bits(3);
    }
    18 + stream.get_bits(LENGTH_TAIL_BITS)
}

fn read_distance(stream: &mut BitStream) -> u64 {
    let value = u64::from(stream.get_bits(6));
    if value < 2 {
        return value + 1;
    }

    let top = (value >> 1) - 1;
    let tail = if top > 0 {
        u64::from(stream.get_bits(top as u32))
    } else {
        0
    };

    (((value & 1) | 2) << top) + tail + 1
}

/// Copy a match byte by byte: matches routinely overlap the write cursor
/// (a distance-1 match replicates the previous byte), so a block copy
/// would be wrong.
fn copy_match(dest: &mut Vec<u8>, distance: u64, length: u32) -> Result<()> {
    ensure!(
        distance >= 1 && distance <= dest.len() as u64,
        LzaError::CorruptStream("match distance outside decoded output")
    );

    let distance = distance as usize;
    for _ in 0..length {
        let byte = dest[dest.len() - distance];
        dest.push(byte);
    }

    Ok(())
}

/// Decode the LZ intermediate (header plus five streams) into exactly
/// `dest_size` bytes.
pub fn lz_decompress(lz: &[u8], dest_size: usize) -> Result<Vec<u8>> {
    let mut dest = Vec::with_capacity(dest_size);
    if dest_size == 0 {
        return Ok(dest);
    }

    let mut header = BitStream::new(lz);
    let mut stream_sizes = [0usize; 5];
    for stream_size in stream_sizes.iter_mut() {
        let value = read_distance(&mut header) - 1;
        ensure!(
            value <= lz.len() as u64,
            LzaError::CorruptStream("stream size exceeds payload")
        );
        *stream_size = value as usize;
    }

    // The header was tail-flushed to a whole byte, so the reader's byte
    // cursor now sits exactly on the first stream.
    let header_size = header.byte_pos();
    let total: usize = stream_sizes.iter().sum();
    ensure!(
        total <= lz.len() - header_size,
        LzaError::CorruptStream("stream sizes exceed payload")
    );

    trace!("lz streams: header {} + {:?}", header_size, stream_sizes);

    let rest = &lz[header_size..];
    let (types_bytes, rest) = rest.split_at(stream_sizes[0]);
    let (literal_msb_bytes, rest) = rest.split_at(stream_sizes[1]);
    let (literal_bytes, rest) = rest.split_at(stream_sizes[2]);
    let (size_bytes, rest) = rest.split_at(stream_sizes[3]);
    let (offset_bytes, _) = rest.split_at(stream_sizes[4]);

    let mut types = BitStream::new(types_bytes);
    let mut literal_msbs = BitStream::new(literal_msb_bytes);
    let mut literals = BitStream::new(literal_bytes);
    let mut sizes = BitStream::new(size_bytes);
    let mut offsets = BitStream::new(offset_bytes);

    let mut prev_lit = 0u8;
    let mut last_dist = [0u32; 4];

    while dest.len() < dest_size {
        if types.get_one_bit() == 0 {
            // LIT: the top bit arrives as a flip relative to the previous
            // literal, the low seven bits verbatim.
            let msb = (literal_msbs.get_one_bit() as u8) << 7;
            let byte = (msb ^ (prev_lit & 0x80)) | literals.get_bits(7) as u8;
            prev_lit = byte;
            dest.push(byte);
        } else if types.get_one_bit() == 0 {
            // MATCH
            let length = read_length(&mut sizes);
            let distance = read_distance(&mut offsets);
            copy_match(&mut dest, distance, length)?;
            push_distance(&mut last_dist, distance as u32);
        } else {
            match types.get_bits(2) {
                0b00 => {
                    // SHORTREP: one byte at the most recent distance.
                    copy_match(&mut dest, u64::from(last_dist[0]), 1)?;
                }
                code => {
                    // LONGREP0..3
                    let slot = if code < 3 {
                        code as usize - 1
                    } else {
                        2 + types.get_one_bit() as usize
                    };
                    let length = read_length(&mut sizes);
                    let distance = last_dist[slot];
                    copy_match(&mut dest, u64::from(distance), length)?;
                    push_distance(&mut last_dist, distance);
                }
            }
        }
    }

    // A corrupt size stream may overshoot on the final match.
    dest.truncate(dest_size);

    Ok(dest)
}

/// Decompress a blob produced by [`crate::compress`]. The caller supplies
/// the decompressed size and a scratch size at least as large as the LZ
/// intermediate (`2 * dest_size` is a safe heuristic; the exact value is
/// reported by compression).
pub fn decompress(compressed: &[u8], dest_size: usize, scratch_size: usize) -> Result<Vec<u8>> {
    if dest_size == 0 {
        return Ok(Vec::new());
    }

    ensure!(compressed.len() > 2, LzaError::TruncatedInput);

    let window_size = u32::from(compressed[0]) | (u32::from(compressed[1]) << 8);
    ensure!(
        window_size >= 1 && window_size <= MAX_WINDOW_SIZE,
        LzaError::InvalidWindowSize(window_size)
    );

    let scratch = arith_decode(&compressed[2..], scratch_size, window_size);

    lz_decompress(&scratch, dest_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitEmitter;
    use crate::compress::{emit_distance, emit_length};

    #[test]
    fn length_field_roundtrip() {
        for length in (2u32..=17).chain([18, 100, 1000, 2065]) {
            let mut emitter = BitEmitter::new();
            emit_length(&mut emitter, length);
            emitter.emit_tail();
            let bytes = emitter.into_bytes();

            let mut stream = BitStream::new(&bytes);
            assert_eq!(read_length(&mut stream), length);
        }
    }

    #[test]
    fn distance_field_roundtrip() {
        let mut probe: Vec<u64> = (1..=70).collect();
        for shift in 7..31 {
            let base = 1u64 << shift;
            probe.extend_from_slice(&[base - 1, base, base + 1]);
        }
        probe.push(1 << 31);

        for distance in probe {
            let mut emitter = BitEmitter::new();
            emit_distance(&mut emitter, distance);
            emitter.emit_tail();
            let bytes = emitter.into_bytes();

            let mut stream = BitStream::new(&bytes);
            assert_eq!(read_distance(&mut stream), distance, "distance {}", distance);
        }
    }

    #[test]
    fn zero_destination_is_a_noop() {
        assert!(decompress(&[], 0, 0).unwrap().is_empty());
        assert!(lz_decompress(&[], 0).unwrap().is_empty());
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(decompress(&[0x80], 4, 8).is_err());
        assert!(decompress(&[0x80, 0x00], 4, 8).is_err());
    }

    #[test]
    fn out_of_range_window_is_rejected() {
        // Window 0.
        assert!(decompress(&[0x00, 0x00, 0xAA, 0xAA], 4, 8).is_err());
        // Window 0xFFFF.
        assert!(decompress(&[0xFF, 0xFF, 0xAA, 0xAA], 4, 8).is_err());
    }

    #[test]
    fn corrupt_streams_fail_without_panicking() {
        // All-ones header decodes to absurd stream sizes.
        assert!(lz_decompress(&[0xFF, 0xFF, 0xFF, 0xFF], 10).is_err());

        // An empty payload claims five empty streams, then the TYPE
        // stream replays zeros forever: every packet is a LIT assembled
        // from replayed bits. That must terminate with output, not hang
        // or panic.
        let mut header = BitEmitter::new();
        for _ in 0..5 {
            emit_distance(&mut header, 1);
        }
        header.emit_tail();
        let blob = header.into_bytes();
        let out = lz_decompress(&blob, 4).unwrap();
        assert_eq!(out.len(), 4);

        // A SHORTREP before any match must be caught: distance list is
        // still all zeros.
        let mut types = BitEmitter::new();
        types.emit_bits(0b1100, 4);
        types.emit_tail();
        let mut blob = Vec::new();
        let mut sized_header = BitEmitter::new();
        emit_distance(&mut sized_header, types.len() as u64 + 1);
        for _ in 0..4 {
            emit_distance(&mut sized_header, 1);
        }
        sized_header.emit_tail();
        blob.extend_from_slice(sized_header.as_bytes());
        blob.extend_from_slice(types.as_bytes());
        assert!(lz_decompress(&blob, 4).is_err());
    }
}
