//! Row-major 2-D bit matrices padded to word boundaries on both axes.

use std::fmt;

use rand::Rng;

use crate::bits::SimdBits;
use crate::word::{WORD_BITS, WORD_POW, bits_to_words, transpose_block_strided};

/// A bit matrix whose row and column counts are each padded up to a multiple
/// of the word width.
///
/// Row `i` occupies exactly `num_words_minor` physically contiguous words.
/// Padding bits read as zero unless a bulk operation has written them; all
/// bulk operations produce deterministic padding.
#[derive(Clone, PartialEq, Eq)]
pub struct BitTable {
    num_words_major: usize,
    num_words_minor: usize,
    data: SimdBits,
}

impl BitTable {
    /// Creates a zeroed table with at least the requested bit dimensions.
    pub fn new(min_bits_major: usize, min_bits_minor: usize) -> Self {
        let num_words_major = bits_to_words(min_bits_major);
        let num_words_minor = bits_to_words(min_bits_minor);
        Self {
            num_words_major,
            num_words_minor,
            data: SimdBits::new(num_words_major * WORD_BITS * num_words_minor * WORD_BITS),
        }
    }

    /// Creates an n×n identity matrix.
    pub fn identity(n: usize) -> Self {
        let mut result = Self::new(n, n);
        for k in 0..n {
            result.set(k, k, true);
        }
        result
    }

    /// Creates a table whose first `major_bits × minor_bits` entries are random.
    pub fn random<R: Rng>(major_bits: usize, minor_bits: usize, rng: &mut R) -> Self {
        let mut result = Self::new(major_bits, minor_bits);
        for maj in 0..major_bits {
            let w = result.num_words_minor;
            let row = &mut result.data.as_words_mut()[maj * w..(maj + 1) * w];
            let full = minor_bits >> WORD_POW;
            for word in &mut row[..full] {
                *word = rng.r#gen();
            }
            let leftover = minor_bits & (WORD_BITS - 1);
            if leftover != 0 {
                row[full] = rng.r#gen::<u64>() & ((1u64 << leftover) - 1);
            }
        }
        result
    }

    #[inline]
    pub fn num_words_major(&self) -> usize {
        self.num_words_major
    }

    #[inline]
    pub fn num_words_minor(&self) -> usize {
        self.num_words_minor
    }

    #[inline]
    pub fn num_major_bits_padded(&self) -> usize {
        self.num_words_major * WORD_BITS
    }

    #[inline]
    pub fn num_minor_bits_padded(&self) -> usize {
        self.num_words_minor * WORD_BITS
    }

    /// Reads entry `(maj, min)`.
    #[inline]
    pub fn get(&self, maj: usize, min: usize) -> bool {
        self.data.get(maj * self.num_minor_bits_padded() + min)
    }

    /// Writes entry `(maj, min)`.
    #[inline]
    pub fn set(&mut self, maj: usize, min: usize, value: bool) {
        let idx = maj * self.num_minor_bits_padded() + min;
        self.data.set(idx, value);
    }

    /// XORs into entry `(maj, min)`.
    #[inline]
    pub fn xor_bit(&mut self, maj: usize, min: usize, value: bool) {
        let idx = maj * self.num_minor_bits_padded() + min;
        self.data.xor_bit(idx, value);
    }

    /// The words of row `maj`.
    #[inline]
    pub fn row(&self, maj: usize) -> &[u64] {
        let w = self.num_words_minor;
        &self.data.as_words()[maj * w..(maj + 1) * w]
    }

    /// The words of row `maj`, mutably.
    #[inline]
    pub fn row_mut(&mut self, maj: usize) -> &mut [u64] {
        let w = self.num_words_minor;
        &mut self.data.as_words_mut()[maj * w..(maj + 1) * w]
    }

    /// Mutable access to two distinct rows at once.
    pub fn two_rows_mut(&mut self, a: usize, b: usize) -> (&mut [u64], &mut [u64]) {
        assert_ne!(a, b);
        let w = self.num_words_minor;
        let words = self.data.as_words_mut();
        if a < b {
            let (lo, hi) = words.split_at_mut(b * w);
            (&mut lo[a * w..(a + 1) * w], &mut hi[..w])
        } else {
            let (lo, hi) = words.split_at_mut(a * w);
            let b_row = &mut lo[b * w..(b + 1) * w];
            (&mut hi[..w], b_row)
        }
    }

    /// XORs row `src` into row `dst`.
    pub fn xor_row_into(&mut self, src: usize, dst: usize) {
        let (d, s) = self.two_rows_mut(dst, src);
        for (a, b) in d.iter_mut().zip(s.iter()) {
            *a ^= *b;
        }
    }

    /// Swaps rows `a` and `b`.
    pub fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let (ra, rb) = self.two_rows_mut(a, b);
        ra.swap_with_slice(rb);
    }

    /// Zeroes the whole table.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Mod-2 matrix product over the leading n×n entries.
    ///
    /// Both inputs must be padded to at least n on both axes. The right-hand
    /// side is transposed once so each output entry is a word-parallel
    /// AND-XOR of two contiguous rows followed by a popcount parity.
    pub fn square_mat_mul(&self, rhs: &BitTable, n: usize) -> BitTable {
        assert!(self.num_major_bits_padded() >= n && self.num_minor_bits_padded() >= n);
        assert!(rhs.num_major_bits_padded() >= n && rhs.num_minor_bits_padded() >= n);

        let tmp = rhs.transposed();

        let mut result = BitTable::new(n, n);
        for row in 0..n {
            for col in 0..n {
                let mut acc = 0u64;
                for (a, b) in self.row(row).iter().zip(tmp.row(col)) {
                    acc ^= a & b;
                }
                result.set(row, col, acc.count_ones() & 1 != 0);
            }
        }
        result
    }

    /// Inverts the leading n×n block, which must be lower triangular with a
    /// unit diagonal.
    pub fn inverse_assuming_lower_triangular(&self, n: usize) -> BitTable {
        assert!(self.num_major_bits_padded() >= n && self.num_minor_bits_padded() >= n);

        let mut result = BitTable::identity(n);
        let mut copy_row = vec![0u64; self.num_words_minor];
        for target in 0..n {
            copy_row.copy_from_slice(self.row(target));
            for pivot in 0..target {
                if (copy_row[pivot >> WORD_POW] >> (pivot & (WORD_BITS - 1))) & 1 != 0 {
                    for (c, p) in copy_row.iter_mut().zip(self.row(pivot)) {
                        *c ^= p;
                    }
                    result.xor_row_into(pivot, target);
                }
            }
        }
        result
    }

    /// Transposes each aligned 64×64 block of the table in place.
    ///
    /// This exchanges the low six bits of the major and minor addresses;
    /// block positions are untouched.
    fn exchange_low_indices(&mut self) {
        let num_minor = self.num_words_minor;
        for maj_high in 0..self.num_words_major {
            for min_high in 0..num_minor {
                let base = (maj_high << WORD_POW) * num_minor + min_high;
                transpose_block_strided(self.data.as_words_mut(), base, num_minor);
            }
        }
    }

    /// In-place transpose. Requires the padded shape to be square.
    pub fn do_square_transpose(&mut self) {
        assert_eq!(self.num_words_minor, self.num_words_major);

        self.exchange_low_indices();

        // Exchange the high address bits of majors and minors by swapping
        // whole blocks across the diagonal.
        let num_minor = self.num_words_minor;
        let words = self.data.as_words_mut();
        for maj_high in 0..num_minor {
            for min_high in maj_high + 1..num_minor {
                for maj_low in 0..WORD_BITS {
                    words.swap(
                        (maj_low + (maj_high << WORD_POW)) * num_minor + min_high,
                        (maj_low + (min_high << WORD_POW)) * num_minor + maj_high,
                    );
                }
            }
        }
    }

    /// Writes the transpose of `self` into `out`, which must have the
    /// swapped padded shape.
    pub fn transpose_into(&self, out: &mut BitTable) {
        assert_eq!(out.num_words_minor, self.num_words_major);
        assert_eq!(out.num_words_major, self.num_words_minor);

        let num_minor = self.num_words_minor;
        let out_minor = out.num_words_minor;
        for maj_high in 0..self.num_words_major {
            for min_high in 0..num_minor {
                for maj_low in 0..WORD_BITS {
                    let src = (maj_low + (maj_high << WORD_POW)) * num_minor + min_high;
                    let dst = (maj_low + (min_high << WORD_POW)) * out_minor + maj_high;
                    out.data.as_words_mut()[dst] = self.data.as_words()[src];
                }
            }
        }

        out.exchange_low_indices();
    }

    /// Returns the transpose as a new table.
    pub fn transposed(&self) -> BitTable {
        let mut result = BitTable::new(self.num_minor_bits_padded(), self.num_major_bits_padded());
        self.transpose_into(&mut result);
        result
    }

    /// Copies out the rows `[maj_start, maj_stop)`.
    pub fn slice_maj(&self, maj_start: usize, maj_stop: usize) -> BitTable {
        let mut result = BitTable::new(maj_stop - maj_start, self.num_minor_bits_padded());
        for k in maj_start..maj_stop {
            result.row_mut(k - maj_start).copy_from_slice(self.row(k));
        }
        result
    }

    /// Renders the leading `rows × cols` entries, one row per line.
    pub fn str_section(&self, rows: usize, cols: usize) -> String {
        let mut out = String::new();
        for row in 0..rows {
            if row != 0 {
                out.push('\n');
            }
            for col in 0..cols {
                out.push(if self.get(row, col) { '1' } else { '.' });
            }
        }
        out
    }

    /// Parses a table from lines of `1` / `0` / `.` / `_` characters.
    ///
    /// Whitespace indentation is ignored. Panics on any other character;
    /// this is a test/diagnostic constructor, not a data format.
    pub fn from_text(text: &str, min_rows: usize, min_cols: usize) -> BitTable {
        let mut lines: Vec<Vec<bool>> = vec![];
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            lines.push(
                trimmed
                    .chars()
                    .map(|c| match c {
                        '1' => true,
                        '0' | '.' | '_' => false,
                        other => panic!("expected a character from \"10._\", got {other:?}"),
                    })
                    .collect(),
            );
        }

        let num_cols = lines.iter().map(Vec::len).max().unwrap_or(0).max(min_cols);
        let num_rows = lines.len().max(min_rows);
        let mut out = BitTable::new(num_rows, num_cols);
        for (row, line) in lines.iter().enumerate() {
            for (col, &v) in line.iter().enumerate() {
                out.set(row, col, v);
            }
        }
        out
    }
}

impl fmt::Debug for BitTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.str_section(self.num_major_bits_padded(), self.num_minor_bits_padded())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_shape() {
        let t = BitTable::new(100, 70);
        assert_eq!(t.num_words_major(), 2);
        assert_eq!(t.num_words_minor(), 2);
        assert_eq!(t.num_major_bits_padded(), 128);
        assert_eq!(t.num_minor_bits_padded(), 128);
    }

    #[test]
    fn test_identity() {
        let t = BitTable::identity(5);
        for r in 0..5 {
            for c in 0..5 {
                assert_eq!(t.get(r, c), r == c);
            }
        }
    }

    #[test]
    fn test_get_set_rows() {
        let mut t = BitTable::new(128, 128);
        t.set(70, 3, true);
        assert!(t.get(70, 3));
        assert_eq!(t.row(70)[0], 1 << 3);
        t.xor_row_into(70, 71);
        assert!(t.get(71, 3));
        t.swap_rows(70, 0);
        assert!(t.get(0, 3));
        assert!(!t.get(70, 3));
    }

    #[test]
    fn test_square_transpose_matches_naive() {
        let mut rng = StdRng::seed_from_u64(7);
        let t = BitTable::random(130, 130, &mut rng);
        let mut u = t.clone();
        u.do_square_transpose();
        for r in 0..192 {
            for c in 0..192 {
                assert_eq!(u.get(r, c), t.get(c, r), "mismatch at ({r},{c})");
            }
        }
        u.do_square_transpose();
        assert_eq!(u, t);
    }

    #[test]
    fn test_transpose_into_rectangular() {
        let mut rng = StdRng::seed_from_u64(11);
        let t = BitTable::random(65, 140, &mut rng);
        let u = t.transposed();
        assert_eq!(u.num_major_bits_padded(), t.num_minor_bits_padded());
        assert_eq!(u.num_minor_bits_padded(), t.num_major_bits_padded());
        for r in 0..65 {
            for c in 0..140 {
                assert_eq!(t.get(r, c), u.get(c, r));
            }
        }
    }

    #[test]
    fn test_mat_mul_against_naive() {
        let mut rng = StdRng::seed_from_u64(3);
        let n = 40;
        let a = BitTable::random(n, n, &mut rng);
        let b = BitTable::random(n, n, &mut rng);
        let c = a.square_mat_mul(&b, n);
        for r in 0..n {
            for col in 0..n {
                let mut expected = false;
                for k in 0..n {
                    expected ^= a.get(r, k) & b.get(k, col);
                }
                assert_eq!(c.get(r, col), expected);
            }
        }
    }

    #[test]
    fn test_mat_mul_identity() {
        let mut rng = StdRng::seed_from_u64(9);
        let n = 100;
        let a = BitTable::random(n, n, &mut rng);
        let i = BitTable::identity(n);
        assert_eq!(a.square_mat_mul(&i, n), a);
        assert_eq!(i.square_mat_mul(&a, n), a);
    }

    #[test]
    fn test_lower_triangular_inverse() {
        let mut rng = StdRng::seed_from_u64(13);
        let n = 70;
        let mut m = BitTable::new(n, n);
        for r in 0..n {
            m.set(r, r, true);
            for c in 0..r {
                m.set(r, c, rng.r#gen());
            }
        }
        let inv = m.inverse_assuming_lower_triangular(n);
        assert_eq!(m.square_mat_mul(&inv, n), BitTable::identity(n));
    }

    #[test]
    fn test_slice_maj() {
        let mut t = BitTable::new(128, 64);
        t.set(64, 5, true);
        t.set(65, 6, true);
        let s = t.slice_maj(64, 66);
        assert!(s.get(0, 5));
        assert!(s.get(1, 6));
    }

    #[test]
    fn test_text_round_trip() {
        let t = BitTable::from_text("1..\n.1.\n..1\n", 0, 0);
        assert_eq!(t.str_section(3, 3), "1..\n.1.\n..1");
        assert!(t.get(1, 1));
        assert!(!t.get(1, 2));
    }
}
