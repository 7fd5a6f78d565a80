//! `skuld-bits` — bit-packed boolean linear algebra.
//!
//! The performance substrate of the skuld stabilizer engine. Everything the
//! higher layers do — Pauli products, tableau updates, measurement collapse —
//! bottoms out in word-parallel XOR/AND/OR, popcounts, and block transposes
//! over {0,1}-matrices, all provided here.
//!
//! # Core types
//!
//! - [`SimdBits`]: an owned bit vector padded to whole 64-bit words, with
//!   bulk boolean operators, biased random fill, and truncated copies.
//! - [`BitTable`]: a row-major bit matrix padded on both axes, with mod-2
//!   matrix multiply, in-place square transpose, and lower-triangular
//!   inversion.
//! - [`RareHits`]: geometric-gap sampling of rare Bernoulli events, plus
//!   [`biased_randomize_bits`] for batch biased bit generation.
//!
//! # Example
//!
//! ```rust
//! use skuld_bits::BitTable;
//!
//! let i = BitTable::identity(100);
//! let mut t = i.clone();
//! t.do_square_transpose();
//! assert_eq!(t, i);
//! ```

pub mod bits;
pub mod prob;
pub mod table;
pub mod word;

pub use bits::SimdBits;
pub use prob::{RareHits, biased_randomize_bits, sample_hit_indices};
pub use table::BitTable;
pub use word::{WORD_BITS, WORD_POW, bits_to_bits_padded, bits_to_words, transpose_block};
