//! Padded bit vectors with word-parallel boolean operations.

use std::fmt;
use std::ops::{BitAndAssign, BitOrAssign, BitXorAssign};

use rand::Rng;

use crate::word::{WORD_BITS, WORD_POW, bits_to_words};

/// An owned bit vector padded up to a whole number of 64-bit words.
///
/// The vector tracks only its padded word count; logical bit lengths are the
/// caller's concern. Bits past a logical length are kept deterministic: word
/// operations act on the full padded buffer, and bit-indexed reads of
/// never-written padding observe zero.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SimdBits {
    words: Vec<u64>,
}

impl SimdBits {
    /// Creates a zeroed bit vector with capacity for at least `min_bits` bits.
    pub fn new(min_bits: usize) -> Self {
        Self {
            words: vec![0; bits_to_words(min_bits)],
        }
    }

    /// Number of padded words.
    #[inline]
    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    /// Number of padded bits.
    #[inline]
    pub fn num_bits_padded(&self) -> usize {
        self.words.len() * WORD_BITS
    }

    #[inline]
    pub fn as_words(&self) -> &[u64] {
        &self.words
    }

    #[inline]
    pub fn as_words_mut(&mut self) -> &mut [u64] {
        &mut self.words
    }

    /// Reads bit `k`.
    #[inline]
    pub fn get(&self, k: usize) -> bool {
        (self.words[k >> WORD_POW] >> (k & (WORD_BITS - 1))) & 1 != 0
    }

    /// Writes bit `k`.
    #[inline]
    pub fn set(&mut self, k: usize, value: bool) {
        let mask = 1u64 << (k & (WORD_BITS - 1));
        if value {
            self.words[k >> WORD_POW] |= mask;
        } else {
            self.words[k >> WORD_POW] &= !mask;
        }
    }

    /// XORs `value` into bit `k`.
    #[inline]
    pub fn xor_bit(&mut self, k: usize, value: bool) {
        self.words[k >> WORD_POW] ^= (value as u64) << (k & (WORD_BITS - 1));
    }

    /// Zeroes the whole padded buffer.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Flips every bit in the padded buffer.
    pub fn invert_bits(&mut self) {
        for w in &mut self.words {
            *w = !*w;
        }
    }

    /// Whether any padded word is nonzero.
    pub fn not_zero(&self) -> bool {
        self.words.iter().any(|&w| w != 0)
    }

    /// Whether any word of `self AND other` is nonzero.
    pub fn intersects(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .any(|(&a, &b)| a & b != 0)
    }

    /// Total popcount over the padded buffer.
    pub fn popcnt(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Overwrites the first `num_bits` bits with uniform randomness.
    ///
    /// Bits at `num_bits` and above are left untouched.
    pub fn randomize<R: Rng>(&mut self, num_bits: usize, rng: &mut R) {
        let n = num_bits >> WORD_POW;
        for w in &mut self.words[..n] {
            *w = rng.r#gen();
        }
        let leftover = num_bits & (WORD_BITS - 1);
        if leftover != 0 {
            let mask = (1u64 << leftover) - 1;
            self.words[n] &= !mask;
            self.words[n] |= rng.r#gen::<u64>() & mask;
        }
    }

    /// Copies the first `num_bits` bits from `other`, leaving later bits alone.
    pub fn truncated_overwrite_from(&mut self, other: &Self, num_bits: usize) {
        let n = num_bits >> WORD_POW;
        self.words[..n].copy_from_slice(&other.words[..n]);
        let leftover = num_bits & (WORD_BITS - 1);
        if leftover != 0 {
            let mask = (1u64 << leftover) - 1;
            self.words[n] &= !mask;
            self.words[n] |= other.words[n] & mask;
        }
    }

    /// Exchanges contents with `other`. Lengths must match.
    pub fn swap_with(&mut self, other: &mut Self) {
        debug_assert_eq!(self.words.len(), other.words.len());
        self.words.swap_with_slice(&mut other.words);
    }

    /// Iterates the indices of set bits.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            let mut w = w;
            std::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let b = w.trailing_zeros() as usize;
                w &= w - 1;
                Some((i << WORD_POW) | b)
            })
        })
    }
}

impl BitXorAssign<&SimdBits> for SimdBits {
    fn bitxor_assign(&mut self, rhs: &SimdBits) {
        debug_assert_eq!(self.words.len(), rhs.words.len());
        for (a, b) in self.words.iter_mut().zip(&rhs.words) {
            *a ^= b;
        }
    }
}

impl BitAndAssign<&SimdBits> for SimdBits {
    fn bitand_assign(&mut self, rhs: &SimdBits) {
        debug_assert_eq!(self.words.len(), rhs.words.len());
        for (a, b) in self.words.iter_mut().zip(&rhs.words) {
            *a &= b;
        }
    }
}

impl BitOrAssign<&SimdBits> for SimdBits {
    fn bitor_assign(&mut self, rhs: &SimdBits) {
        debug_assert_eq!(self.words.len(), rhs.words.len());
        for (a, b) in self.words.iter_mut().zip(&rhs.words) {
            *a |= b;
        }
    }
}

impl fmt::Debug for SimdBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for k in 0..self.num_bits_padded() {
            write!(f, "{}", if self.get(k) { '1' } else { '.' })?;
        }
        Ok(())
    }
}
