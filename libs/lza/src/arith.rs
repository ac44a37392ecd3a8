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

//! Adaptive binary arithmetic coder.
//!
//! A classic 32-bit integer range coder driven by the sliding-window
//! [`Model`]. Encoder and decoder narrow the `[low, high]` range with the
//! identical `(p0, p1, mid)` recipe (64-bit multiply, truncating 32-bit
//! division) and the identical renormalization discipline:
//!
//! - E1/E2: the top bits of `low` and `high` agree; the encoder emits the
//!   common bit (the top of `low`) followed by any deferred underflow bits
//!   as its complement, then both registers shift left.
//! - E3: the range straddles the midpoint within the second-highest bit;
//!   no bit can be emitted yet, so the encoder counts it as pending and
//!   both registers expand around the midpoint.
//!
//! Payload bytes pass through the model low bit first.

use crate::bits::{BitEmitter, BitStream};
use crate::model::Model;
use log::trace;

const TOP_BIT: u32 = 0x8000_0000;
const SECOND_BIT: u32 = 0x4000_0000;

struct Encoder {
    model: Model,
    emit: BitEmitter,
    low: u32,
    high: u32,
    num_pending: u32,
}

impl Encoder {
    fn new(window_size: u32) -> Self {
        Self {
            model: Model::new(window_size),
            emit: BitEmitter::new(),
            low: 0,
            high: u32::MAX,
            num_pending: 0,
        }
    }

    fn encode_bit(&mut self, bit: u32) {
        let (prob0, prob1) = self.model.probabilities();

        let range = u64::from(self.high) - u64::from(self.low) + 1;
        let mid = ((range * u64::from(prob0)) / u64::from(prob0 + prob1)) as u32;

        self.model.update(bit);

        if bit != 0 {
            self.low += mid;
        } else {
            self.high = self.low + mid - 1;
        }

        loop {
            if self.high < TOP_BIT || self.low >= TOP_BIT {
                let mut out_bit = self.low >> 31;

                self.emit.emit_bit(out_bit);

                out_bit ^= 1;
                while self.num_pending > 0 {
                    self.emit.emit_bit(out_bit);
                    self.num_pending -= 1;
                }
            } else if self.low >= SECOND_BIT && self.high < (TOP_BIT | SECOND_BIT) {
                self.num_pending += 1;
                self.low -= SECOND_BIT;
                self.high -= SECOND_BIT;
            } else {
                break;
            }

            self.low <<= 1;
            self.high = (self.high << 1) | 1;
        }

        debug_assert!(self.low < self.high);
    }

    fn finish(mut self) -> Vec<u8> {
        // One bit picks the half of the final range; its complement flushes
        // any pending underflow bits. The reader's replay of the last bit
        // supplies everything else the decoder will ask for.
        let out_bit = u32::from(self.low >= SECOND_BIT);

        self.emit.emit_bit(out_bit);
        self.emit.emit_bit(out_bit ^ 1);
        self.emit.emit_tail();

        self.emit.into_bytes()
    }
}

/// Entropy-code `src` and return the coded bytes. Empty input produces
/// empty output.
pub fn arith_encode(src: &[u8], window_size: u32) -> Vec<u8> {
    if src.is_empty() {
        return Vec::new();
    }

    let mut encoder = Encoder::new(window_size);

    for &byte in src {
        for shift in 0..8 {
            encoder.encode_bit(u32::from(byte >> shift) & 1);
        }
    }

    let coded = encoder.finish();
    trace!("entropy coded {} -> {} bytes", src.len(), coded.len());
    coded
}

struct Decoder<'a> {
    model: Model,
    stream: BitStream<'a>,
    low: u32,
    high: u32,
    value: u32,
}

impl<'a> Decoder<'a> {
    fn new(src: &'a [u8], window_size: u32) -> Self {
        let mut stream = BitStream::new(src);
        let value = stream.get_bits(32);

        Self {
            model: Model::new(window_size),
            stream,
            low: 0,
            high: u32::MAX,
            value,
        }
    }

    fn decode_bit(&mut self) -> u32 {
        let (prob0, prob1) = self.model.probabilities();

        let range = u64::from(self.high) - u64::from(self.low) + 1;
        let mid = ((range * u64::from(prob0)) / u64::from(prob0 + prob1)) as u32;

        let bit = u32::from(self.value >= self.low + mid);

        self.model.update(bit);

        if bit != 0 {
            self.low += mid;
        } else {
            self.high = self.low + mid - 1;
        }

        loop {
            if self.high < TOP_BIT || self.low >= TOP_BIT {
                // E1/E2: the top bits already agree, just shift them out.
            } else if self.low >= SECOND_BIT && self.high < (TOP_BIT | SECOND_BIT) {
                self.value -= SECOND_BIT;
                self.low -= SECOND_BIT;
                self.high -= SECOND_BIT;
            } else {
                break;
            }

            self.low <<= 1;
            self.high = (self.high << 1) | 1;
            self.value = (self.value << 1) | self.stream.get_one_bit();
        }

        debug_assert!(self.low < self.high);
        debug_assert!(self.value >= self.low && self.value <= self.high);

        bit
    }
}

/// Decode exactly `dest_size` bytes from the coded input. Decoding past
/// the true end of the coded payload yields unspecified bytes but never
/// reads out of bounds.
pub fn arith_decode(src: &[u8], dest_size: usize, window_size: u32) -> Vec<u8> {
    let mut dest = Vec::with_capacity(dest_size);
    if dest_size == 0 {
        return dest;
    }

    let mut decoder = Decoder::new(src, window_size);

    for _ in 0..dest_size {
        let mut byte = 0u8;
        for shift in 0..8 {
            byte |= (decoder.decode_bit() as u8) << shift;
        }
        dest.push(byte);
    }

    dest
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference vectors locking the wire format of the coder: any drift in
    // the model update, the mid computation or the renormalization shows
    // up as a byte difference here.
    const VECTORS: &[(&[u8], u32, &[u8])] = &[
        (&[0x00], 256, &[0x0F]),
        (&[0xFF], 256, &[0xEF]),
        (&[0x0F], 256, &[0xCC, 0xFF]),
        (&[0xF0], 256, &[0x32, 0xFF]),
        (&[0x55], 256, &[0x9A, 0xBF]),
        (&[0xAA], 256, &[0x65, 0x3F]),
        (&[0x7F], 256, &[0xE0]),
        (&[0x80], 256, &[0x1D]),
        (&[0x00, 0x00, 0x00], 256, &[0x07]),
        (&[0xFF, 0xFF, 0xFF], 256, &[0xF8]),
        (&[0x40, 0x00, 0x00], 256, &[0x20]),
        (&[0xFF, 0xFF, 0x00], 256, &[0xF0, 0xF0, 0xF1, 0x00]),
        (&[0xFF, 0xFF, 0x00], 8, &[0xF3, 0xC1]),
        (&[0x55, 0xAA, 0x55], 64, &[0x9A, 0xA8, 0x61, 0x80]),
        (
            &[
                0xB2, 0x3D, 0x55, 0x0D, 0xCC, 0x4B, 0x63, 0x04, 0x0B, 0xCD, 0xE2, 0x68, 0x9C,
                0xFE, 0xCC, 0x2B,
            ],
            128,
            &[
                0x61, 0x19, 0xB8, 0x3A, 0x62, 0x80, 0x34, 0xA2, 0x41, 0x41, 0xCB, 0xC1, 0xDD,
                0x81, 0x4C, 0x98, 0x8F,
            ],
        ),
        (
            &[
                0xCF, 0xFA, 0xED, 0xFE, 0x07, 0x00, 0x00, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02,
                0x00, 0x00, 0x00,
            ],
            128,
            &[
                0xCE, 0x64, 0x85, 0x55, 0x0C, 0x9C, 0xF2, 0x95, 0x51, 0x2C, 0x89, 0xFC, 0x75,
                0xA0,
            ],
        ),
    ];

    #[test]
    fn empty_input() {
        assert!(arith_encode(&[], 256).is_empty());
        assert!(arith_decode(&[], 0, 256).is_empty());
    }

    #[test]
    fn known_vectors_encode() {
        for &(input, window_size, expected) in VECTORS {
            assert_eq!(
                arith_encode(input, window_size),
                expected,
                "input {:02X?} window {}",
                input,
                window_size
            );
        }
    }

    #[test]
    fn known_vectors_decode() {
        for &(input, window_size, coded) in VECTORS {
            assert_eq!(
                arith_decode(coded, input.len(), window_size),
                input,
                "coded {:02X?} window {}",
                coded,
                window_size
            );
        }
    }

    #[test]
    fn random_roundtrip() {
        let mut state = 0xBEEF_F00Du32;
        let mut lcg = || {
            let value = state & 0x7FFF_FFFF;
            state = state.wrapping_mul(0x08088406).wrapping_add(1);
            value
        };

        for _ in 0..100 {
            let mut input = vec![0u8; 1024];
            for byte in input.iter_mut() {
                *byte = (lcg() & 0xFF) as u8;
            }

            let in_size = 512 + (lcg() & 511) as usize;
            let window_size = 1 + (lcg() & 0x7FF);

            let coded = arith_encode(&input[..in_size], window_size);
            let decoded = arith_decode(&coded, in_size, window_size);

            assert_eq!(decoded, &input[..in_size], "window {}", window_size);
        }
    }

    #[test]
    fn decoding_past_the_payload_is_bounded() {
        let coded = arith_encode(b"tail", 256);
        // Asking for more bytes than were coded must neither panic nor
        // read out of bounds; the prefix still decodes exactly.
        let decoded = arith_decode(&coded, 16, 256);
        assert_eq!(&decoded[..4], b"tail");
    }
}
