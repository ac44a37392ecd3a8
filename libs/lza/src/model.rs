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

//! Adaptive two-symbol probability model shared by the encoder and the
//! decoder of the range coder. Both sides must apply the exact same
//! update sequence or the coded streams desynchronize.

/// Upper bound on the model's sliding bit-history length.
pub const MAX_WINDOW_SIZE: u32 = 2048;

const HISTORY_LEN: usize = MAX_WINDOW_SIZE as usize * 2;

/// Occurrence counts for 0 and 1 bits over a sliding window of the last
/// `window_size` coded bits. Counts are incremented before the oldest bit
/// is evicted, so neither count can ever drop to zero; their sum is
/// bounded by `window_size + 2`.
pub struct Model {
    prob: [u32; 2],
    history: [u8; HISTORY_LEN],
    oldest: usize,
    next: usize,
    window_size: u32,
}

impl Model {
    pub fn new(window_size: u32) -> Self {
        debug_assert!(window_size >= 1 && window_size <= MAX_WINDOW_SIZE);

        Self {
            prob: [1, 1],
            history: [0u8; HISTORY_LEN],
            oldest: 0,
            next: 0,
            window_size,
        }
    }

    pub fn update(&mut self, bit: u32) {
        debug_assert!(bit <= 1);

        self.prob[bit as usize] += 1;

        self.history[self.next] = bit as u8;
        self.next = (self.next + 1) % HISTORY_LEN;

        let history_size = (self.next + HISTORY_LEN - self.oldest) % HISTORY_LEN;
        if history_size as u32 > self.window_size {
            self.prob[self.history[self.oldest] as usize] -= 1;
            self.oldest = (self.oldest + 1) % HISTORY_LEN;
        }
    }

    pub fn probabilities(&self) -> (u32, u32) {
        (self.prob[0], self.prob[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_start_at_one() {
        let model = Model::new(256);
        assert_eq!(model.probabilities(), (1, 1));
    }

    #[test]
    fn updates_increment_matching_count() {
        let mut model = Model::new(256);
        model.update(1);
        model.update(1);
        model.update(0);
        assert_eq!(model.probabilities(), (2, 3));
    }

    #[test]
    fn full_history_evicts_oldest_bit() {
        let mut model = Model::new(4);

        for _ in 0..4 {
            model.update(1);
        }
        assert_eq!(model.probabilities(), (1, 5));

        // The window is full; each further update evicts the oldest bit.
        model.update(1);
        assert_eq!(model.probabilities(), (1, 5));

        model.update(0);
        assert_eq!(model.probabilities(), (2, 4));

        for _ in 0..4 {
            model.update(0);
        }
        assert_eq!(model.probabilities(), (5, 1));
    }

    #[test]
    fn counts_stay_positive_and_bounded() {
        for window_size in [1u32, 2, 7, 64, MAX_WINDOW_SIZE] {
            let mut model = Model::new(window_size);
            let mut state = 0xBEEFu32;

            for _ in 0..(window_size * 4 + 64) {
                state = state.wrapping_mul(0x08088405).wrapping_add(1);
                model.update(state >> 31);

                let (p0, p1) = model.probabilities();
                assert!(p0 >= 1 && p1 >= 1);
                assert!(p0 + p1 <= window_size + 2);
            }

            // Steady state: history is full, the sum is pinned.
            let (p0, p1) = model.probabilities();
            assert_eq!(p0 + p1, window_size + 2);
        }
    }

    #[test]
    fn identical_update_sequences_agree() {
        let mut left = Model::new(32);
        let mut right = Model::new(32);

        let mut state = 0x1234_5678u32;
        for _ in 0..500 {
            state = state.wrapping_mul(0x08088405).wrapping_add(1);
            let bit = state >> 31;
            left.update(bit);
            right.update(bit);
            assert_eq!(left.probabilities(), right.probabilities());
        }
    }
}
