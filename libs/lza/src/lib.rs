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

//! LZA: an LZ77 compressor with an LZMA-style packet vocabulary and an
//! adaptive binary arithmetic coder on the back.
//!
//! Compression runs raw bytes through the match finder, codes the
//! resulting literal/match packets into five role-separated bitstreams,
//! concatenates them behind a small size header and entropy-codes the
//! whole thing:
//!
//! ```text
//! bytes -> find_repeats -> packets -> 5 streams -> header ++ streams -> range coder -> output
//! ```
//!
//! Decompression inverts every stage exactly. Both [`compress`] and
//! [`decompress`] are pure, single-shot transformations over in-memory
//! buffers; nothing is streamed and no state survives a call.
//!
//! ```
//! let original = b"pack all the sections, pack all the sections";
//! let packed = lza::compress(original, 128)?;
//! let restored = lza::decompress(&packed.data, original.len(), packed.sizes.lz)?;
//! assert_eq!(&restored, original);
//! # anyhow::Ok(())
//! ```

mod arith;
mod bits;
mod compress;
mod decompress;
mod model;
mod repeats;

pub use crate::arith::{arith_decode, arith_encode};
pub use crate::bits::{BitEmitter, BitStream};
pub use crate::compress::{compress, estimate_compress_size, lz_compress, Compressed, CompressedSizes};
pub use crate::decompress::{decompress, lz_decompress};
pub use crate::model::{Model, MAX_WINDOW_SIZE};
pub use crate::repeats::{find_repeats, Occurrence, RepeatSink};

use thiserror::Error;

/// Number of tail bits in the top length-field bucket. Part of the wire
/// format: both ends must be built with the same value.
pub const LENGTH_TAIL_BITS: u32 = 11;

/// Longest match the length field can express.
pub const MAX_MATCH_LEN: usize = 17 + (1 << LENGTH_TAIL_BITS);

#[derive(Debug, Error)]
pub enum LzaError {
    #[error("window size {0} is out of range (1..=2048)")]
    InvalidWindowSize(u32),
    #[error("compressed input is truncated")]
    TruncatedInput,
    #[error("corrupt stream: {0}")]
    CorruptStream(&'static str),
}
