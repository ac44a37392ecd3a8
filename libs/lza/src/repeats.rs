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

//! Greedy LZ77 match finder with one step of lookahead.
//!
//! Candidate positions are indexed by a hash over each byte pair. Matches
//! are scored in bits saved versus spending 9 bits per literal, with the
//! packet costs of the wire format baked into the score tables. Matches
//! and literals are handed to the sink strictly in input order.

use crate::{LENGTH_TAIL_BITS, MAX_MATCH_LEN};
use anyhow::{ensure, Result};

const MAX_OFFSETS: usize = 15;
const INVALID: u32 = u32::MAX;

/// Preferring a match whose tail lines up for an immediate repeat packet
/// is usually worth more than this flat bonus, but a small nudge is
/// enough to win ties against plain matches.
const TRAILING_REP_BONUS: i32 = 2;

/// A single match: copy `length` bytes from `distance` bytes back. `slot`
/// is set when the distance equals one of the four most recently used
/// distances, in which case the packet layer can emit a cheap repeat
/// packet instead of re-coding the distance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Occurrence {
    pub distance: u32,
    pub length: u32,
    pub slot: Option<usize>,
}

/// Receiver for the matcher's output. Literals and matches arrive in
/// input order and cover the input exactly once.
pub trait RepeatSink {
    fn literal(&mut self, buf: &[u8], pos: usize, count: usize);
    fn matched(&mut self, buf: &[u8], pos: usize, occurrence: Occurrence);
}

/// Move `distance` to the front of the last-distances list, dropping any
/// duplicate of it further back. Encoder and decoder run this in lockstep.
pub(crate) fn push_distance(last_dist: &mut [u32; 4], distance: u32) {
    let mut i = 0;
    while i < 3 && last_dist[i] != distance {
        i += 1;
    }
    while i > 0 {
        last_dist[i] = last_dist[i - 1];
        i -= 1;
    }
    last_dist[0] = distance;
}

/// Hash table from byte-pair values to chains of position chunks. Newest
/// positions sit at the front of the chain; inside a chunk the slots fill
/// from the back, so slot order is also newest-first.
struct OffsetMap {
    pair_ids: Vec<u32>,
    chunks: Vec<LocationChunk>,
    last_pair: u32,
}

struct LocationChunk {
    offsets: [u32; MAX_OFFSETS],
    next: u32,
}

impl OffsetMap {
    fn new(src_size: usize) -> Self {
        let estimated_chunks = ((src_size / MAX_OFFSETS) * 2).max(0x10000);

        Self {
            pair_ids: vec![INVALID; 0x10000],
            chunks: Vec::with_capacity(estimated_chunks),
            last_pair: INVALID,
        }
    }

    fn pair_at(buf: &[u8], pos: usize) -> usize {
        usize::from(buf[pos]) | (usize::from(buf[pos + 1]) << 8)
    }

    fn insert(&mut self, buf: &[u8], pos: usize) {
        let idx = Self::pair_at(buf, pos);

        // Inside a run of identical bytes only the first pair is indexed;
        // the run re-centering in the candidate scan recovers the missing
        // positions.
        if self.last_pair == idx as u32 {
            return;
        }
        self.last_pair = idx as u32;

        let chunk_id = self.pair_ids[idx];

        if chunk_id != INVALID {
            let chunk = &mut self.chunks[chunk_id as usize];
            if chunk.offsets[0] == INVALID {
                let mut i = 1;
                while i < MAX_OFFSETS && chunk.offsets[i] == INVALID {
                    i += 1;
                }
                chunk.offsets[i - 1] = pos as u32;
                return;
            }
        }

        let mut offsets = [INVALID; MAX_OFFSETS];
        offsets[MAX_OFFSETS - 1] = pos as u32;
        self.chunks.push(LocationChunk {
            offsets,
            next: chunk_id,
        });
        self.pair_ids[idx] = (self.chunks.len() - 1) as u32;
    }
}

/// Length of the run of bytes equal to `buf[pos]` starting at `pos`.
fn repeated_byte_length(buf: &[u8], pos: usize) -> usize {
    let byte = buf[pos];
    let rest = &buf[pos + 1..];
    let pattern = [byte; 8];

    let mut n = 0;
    for chunk in rest.chunks_exact(8) {
        if chunk != pattern {
            break;
        }
        n += 8;
    }
    while n < rest.len() && rest[n] == byte {
        n += 1;
    }

    1 + n
}

/// Length of the common prefix of `buf[left..]` and `buf[right..]`, capped
/// by the end of the buffer and the wire format's maximum match length.
/// Callers guarantee the first two bytes already match.
fn common_length(buf: &[u8], left: usize, right: usize) -> u32 {
    debug_assert!(left < right);
    debug_assert!(buf[left] == buf[right] && buf[left + 1] == buf[right + 1]);

    let cap = (buf.len() - right).min(MAX_MATCH_LEN);
    let mut length = 2;
    while length < cap && buf[left + length] == buf[right + length] {
        length += 1;
    }

    length as u32
}

fn length_bits(length: u32) -> i32 {
    if length <= 9 {
        4
    } else if length <= 17 {
        5
    } else {
        2 + LENGTH_TAIL_BITS as i32
    }
}

fn distance_bits(distance: u32) -> i32 {
    if distance < 2 {
        6
    } else {
        4 + (32 - distance.leading_zeros()) as i32
    }
}

/// Bits saved by a MATCH packet versus coding the same span as literals.
fn match_score(distance: u32, length: u32) -> i32 {
    9 * length as i32 - (2 + length_bits(length) + distance_bits(distance))
}

/// Bits saved by a LONGREP packet, which pays no distance field.
fn longrep_score(slot: usize, length: u32) -> i32 {
    let header_bits = if slot < 2 { 4 } else { 5 };
    9 * length as i32 - (header_bits + length_bits(length))
}

/// Best match at `pos` whose distance is one of the last four distances.
/// Requires `pos + 1 < buf.len()`.
fn occurrence_at_last_dist(buf: &[u8], pos: usize, last_dist: &[u32; 4]) -> Option<Occurrence> {
    let mut best: Option<Occurrence> = None;

    for slot in (0..4).rev() {
        let distance = last_dist[slot];
        if distance == 0 || distance as usize > pos {
            continue;
        }

        let src = pos - distance as usize;
        if buf[src] != buf[pos] || buf[src + 1] != buf[pos + 1] {
            continue;
        }

        let length = common_length(buf, src, pos);
        if best.map_or(true, |b| length >= b.length) {
            best = Some(Occurrence {
                distance,
                length,
                slot: Some(slot),
            });
        }
    }

    best
}

/// Do any of the three bytes after the match also repeat at the same
/// distance? If so, a SHORTREP or LONGREP will likely follow for free.
fn has_trailing_rep(buf: &[u8], pos: usize, distance: u32, length: u32) -> bool {
    let start = pos + length as usize;
    let end = buf.len().min(start + 3);
    (start..end).any(|p| buf[p] == buf[p - distance as usize])
}

fn find_longest_occurrence(
    buf: &[u8],
    pos: usize,
    last_dist: &[u32; 4],
    map: &OffsetMap,
) -> Option<Occurrence> {
    let mut occurrence = occurrence_at_last_dist(buf, pos, last_dist);
    let mut score = match occurrence {
        Some(o) => longrep_score(o.slot.unwrap_or(0), o.length),
        None => 0,
    };

    let repeated = repeated_byte_length(buf, pos);

    let mut chunk_id = map.pair_ids[OffsetMap::pair_at(buf, pos)];
    while chunk_id != INVALID {
        let chunk = &map.chunks[chunk_id as usize];

        for &old_pos in chunk.offsets.iter() {
            if old_pos == INVALID {
                continue;
            }
            let old_pos = old_pos as usize;

            let mut length = common_length(buf, old_pos, pos);
            let mut distance = (pos - old_pos) as u32;

            // The index only records the head of a run of identical
            // bytes; re-center the candidate to the shortest distance
            // inside the run, then extend past its end.
            if length as usize <= repeated && distance > 1 {
                let max_len = repeated_byte_length(buf, pos - distance as usize);
                if max_len > length as usize {
                    let diff = (max_len - length as usize) as u32;
                    distance = if diff < distance { distance - diff } else { 1 };
                    length = common_length(buf, pos - distance as usize, pos);
                }
            }

            // Distances in the last-distance list were scored as repeats.
            if last_dist.contains(&distance) {
                continue;
            }

            let raw_score = match_score(distance, length);
            if raw_score < 2 {
                continue;
            }

            // Short matches only pay off at short distances.
            if length == 3 && distance > (1 << 11) {
                continue;
            }
            if length == 4 && distance > (1 << 13) {
                continue;
            }

            let mut candidate_score = raw_score;
            if has_trailing_rep(buf, pos, distance, length) {
                candidate_score += TRAILING_REP_BONUS;
            }
            if candidate_score <= score {
                continue;
            }

            occurrence = Some(Occurrence {
                distance,
                length,
                slot: None,
            });
            score = candidate_score;
        }

        chunk_id = chunk.next;
    }

    occurrence
}

/// Report the bytes of a pending literal run, downgrading any byte that
/// happens to repeat at the most recent match distance to a length-1
/// repeat, which codes in 4 bits instead of 9.
fn flush_literals(
    buf: &[u8],
    pos: usize,
    count: usize,
    last_dist: u32,
    sink: &mut impl RepeatSink,
) {
    let mut run = 0;
    let end = pos + count;

    for p in pos..end {
        if last_dist != 0 && last_dist as usize <= p && buf[p] == buf[p - last_dist as usize] {
            if run > 0 {
                sink.literal(buf, p - run, run);
                run = 0;
            }
            sink.matched(
                buf,
                p,
                Occurrence {
                    distance: last_dist,
                    length: 1,
                    slot: Some(0),
                },
            );
        } else {
            run += 1;
        }
    }

    if run > 0 {
        sink.literal(buf, end - run, run);
    }
}

/// Walk the input once, reporting every byte either as part of a literal
/// run or as part of a match, in input order.
pub fn find_repeats(buf: &[u8], sink: &mut impl RepeatSink) -> Result<()> {
    let size = buf.len();
    if size == 0 {
        return Ok(());
    }
    ensure!(
        size <= u32::MAX as usize,
        "input of {} bytes exceeds the match finder index range",
        size
    );

    let mut map = OffsetMap::new(size);
    let mut pos = 0usize;
    let mut num_literal = 0usize;
    let mut last_dist = [0u32; 4];

    // A match needs at least two consecutive bytes.
    while pos + 1 < size {
        let found = find_longest_occurrence(buf, pos, &last_dist, &map);

        let mut occurrence = match found {
            Some(occurrence) => occurrence,
            None => {
                map.insert(buf, pos);
                pos += 1;
                num_literal += 1;
                continue;
            }
        };

        // One-step lookahead: if the next position allows a repeat packet
        // at least as good as this match, spend one literal to get it.
        if occurrence.slot.is_none() && pos + 2 < size {
            if let Some(next) = occurrence_at_last_dist(buf, pos + 1, &last_dist) {
                let cur_score = match_score(occurrence.distance, occurrence.length);
                let next_score = longrep_score(next.slot.unwrap_or(0), next.length);

                if next_score >= cur_score {
                    map.insert(buf, pos);
                    pos += 1;
                    num_literal += 1;
                    occurrence = next;
                }
            }
        }

        if num_literal > 0 {
            flush_literals(buf, pos - num_literal, num_literal, last_dist[0], sink);
            num_literal = 0;
        }

        debug_assert!(occurrence.distance >= 1);
        sink.matched(buf, pos, occurrence);

        push_distance(&mut last_dist, occurrence.distance);

        for _ in 0..occurrence.length {
            if pos + 1 < size {
                map.insert(buf, pos);
            }
            pos += 1;
        }
    }

    if pos < size {
        num_literal += 1;
        pos += 1;
    }

    if num_literal > 0 {
        flush_literals(buf, pos - num_literal, num_literal, last_dist[0], sink);
    }

    Ok(())
}
