//! Signed Pauli operator strings.

use std::fmt;
use std::ops::MulAssign;
use std::str::FromStr;

use rand::Rng;
use skuld_bits::SimdBits;

use crate::error::{StabError, StabResult};

/// A single-qubit Pauli operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pauli {
    I,
    X,
    Y,
    Z,
}

impl Pauli {
    /// Decodes from the (x, z) bit pair.
    #[inline]
    pub fn from_xz(x: bool, z: bool) -> Self {
        match (x, z) {
            (false, false) => Pauli::I,
            (true, false) => Pauli::X,
            (true, true) => Pauli::Y,
            (false, true) => Pauli::Z,
        }
    }

    /// Encodes into the (x, z) bit pair.
    #[inline]
    pub fn to_xz(self) -> (bool, bool) {
        match self {
            Pauli::I => (false, false),
            Pauli::X => (true, false),
            Pauli::Y => (true, true),
            Pauli::Z => (false, true),
        }
    }
}

impl fmt::Display for Pauli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Pauli::I => '_',
            Pauli::X => 'X',
            Pauli::Y => 'Y',
            Pauli::Z => 'Z',
        };
        write!(f, "{c}")
    }
}

/// A length-n Pauli operator `±1 × P₀ ⊗ P₁ ⊗ … ⊗ P_{n-1}`.
///
/// Encoded as two padded bit vectors plus a sign bit: qubit `j` holds
/// `(xs[j], zs[j]) = (0,0)=I, (1,0)=X, (0,1)=Z, (1,1)=Y`. A true sign means
/// the operator carries a global −1.
#[derive(Clone, PartialEq, Eq)]
pub struct PauliString {
    num_qubits: usize,
    /// Global sign bit (true = −1).
    pub sign: bool,
    /// X components, one bit per qubit.
    pub xs: SimdBits,
    /// Z components, one bit per qubit.
    pub zs: SimdBits,
}

impl PauliString {
    /// The identity operator on `num_qubits` qubits.
    pub fn identity(num_qubits: usize) -> Self {
        Self {
            num_qubits,
            sign: false,
            xs: SimdBits::new(num_qubits),
            zs: SimdBits::new(num_qubits),
        }
    }

    /// Builds a Pauli string from a function of the qubit index.
    pub fn from_fn<F: FnMut(usize) -> Pauli>(num_qubits: usize, mut f: F) -> Self {
        let mut result = Self::identity(num_qubits);
        for q in 0..num_qubits {
            result.set(q, f(q));
        }
        result
    }

    /// Samples a uniformly random Pauli string (uniform sign included).
    pub fn random<R: Rng>(num_qubits: usize, rng: &mut R) -> Self {
        let mut result = Self::identity(num_qubits);
        result.xs.randomize(num_qubits, rng);
        result.zs.randomize(num_qubits, rng);
        result.sign = rng.r#gen();
        result
    }

    #[inline]
    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    /// Reads the Pauli at qubit `q`.
    #[inline]
    pub fn get(&self, q: usize) -> Pauli {
        Pauli::from_xz(self.xs.get(q), self.zs.get(q))
    }

    /// Writes the Pauli at qubit `q`.
    #[inline]
    pub fn set(&mut self, q: usize, p: Pauli) {
        let (x, z) = p.to_xz();
        self.xs.set(q, x);
        self.zs.set(q, z);
    }

    /// Whether every component is the identity (sign is ignored).
    pub fn is_identity(&self) -> bool {
        !self.xs.not_zero() && !self.zs.not_zero()
    }

    /// Number of non-identity components.
    pub fn weight(&self) -> usize {
        let mut total = 0;
        for (x, z) in self.xs.as_words().iter().zip(self.zs.as_words()) {
            total += (x | z).count_ones() as usize;
        }
        total
    }

    /// In-place right multiplication `self ← self · rhs`, returning the
    /// accumulated power of `i` (mod 4) of the scalar factor.
    ///
    /// The sign of `self` is left untouched; `rhs.sign` contributes 2 to the
    /// returned phase. Callers expecting a ±1 product must check bit 0 of the
    /// result is clear and fold bit 1 into the sign.
    pub fn inplace_right_mul_with_phase(&mut self, rhs: &PauliString) -> u8 {
        debug_assert_eq!(self.num_qubits, rhs.num_qubits);
        let log_i = mul_words_with_phase(
            self.xs.as_words_mut(),
            self.zs.as_words_mut(),
            rhs.xs.as_words(),
            rhs.zs.as_words(),
        );
        (log_i + ((rhs.sign as u8) << 1)) & 3
    }

    /// Whether `self` and `other` commute.
    pub fn commutes(&self, other: &PauliString) -> bool {
        debug_assert_eq!(self.num_qubits, other.num_qubits);
        commutes_words(
            self.xs.as_words(),
            self.zs.as_words(),
            other.xs.as_words(),
            other.zs.as_words(),
        )
    }

    /// Copies the components at `in_indices` into `out` (qubit `k` of `out`
    /// receives component `in_indices[k]`). Signs are untouched.
    pub fn gather_into(&self, out: &mut PauliString, in_indices: &[usize]) {
        debug_assert_eq!(in_indices.len(), out.num_qubits);
        for (k_out, &k_in) in in_indices.iter().enumerate() {
            out.xs.set(k_out, self.xs.get(k_in));
            out.zs.set(k_out, self.zs.get(k_in));
        }
    }

    /// Writes the components of `self` into `out` at `out_indices`, and XORs
    /// the sign of `self` into `out`.
    pub fn scatter_into(&self, out: &mut PauliString, out_indices: &[usize]) {
        debug_assert_eq!(self.num_qubits, out_indices.len());
        for (k_in, &k_out) in out_indices.iter().enumerate() {
            out.xs.set(k_out, self.xs.get(k_in));
            out.zs.set(k_out, self.zs.get(k_in));
        }
        out.sign ^= self.sign;
    }

    /// Exchanges contents with `other`.
    pub fn swap_with(&mut self, other: &mut PauliString) {
        debug_assert_eq!(self.num_qubits, other.num_qubits);
        std::mem::swap(&mut self.sign, &mut other.sign);
        self.xs.swap_with(&mut other.xs);
        self.zs.swap_with(&mut other.zs);
    }

    /// Sparse text form naming only the non-identity components, e.g.
    /// `+X0*Z2`. The identity renders as `+I`.
    pub fn sparse_str(&self) -> String {
        let mut out = String::new();
        out.push(if self.sign { '-' } else { '+' });
        let mut first = true;
        for k in 0..self.num_qubits {
            let p = self.get(k);
            if p == Pauli::I {
                continue;
            }
            if !first {
                out.push('*');
            }
            first = false;
            out.push(match p {
                Pauli::X => 'X',
                Pauli::Y => 'Y',
                Pauli::Z => 'Z',
                Pauli::I => unreachable!(),
            });
            out.push_str(&k.to_string());
        }
        if first {
            out.push('I');
        }
        out
    }
}

impl MulAssign<&PauliString> for PauliString {
    /// `self ← self · rhs`, which must produce a real (±1) scalar.
    fn mul_assign(&mut self, rhs: &PauliString) {
        let log_i = self.inplace_right_mul_with_phase(rhs);
        assert_eq!(log_i & 1, 0, "product of anticommuting Pauli strings is imaginary");
        self.sign ^= log_i & 2 != 0;
    }
}

impl fmt::Display for PauliString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", if self.sign { '-' } else { '+' })?;
        for k in 0..self.num_qubits {
            write!(f, "{}", self.get(k))?;
        }
        Ok(())
    }
}

impl fmt::Debug for PauliString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl FromStr for PauliString {
    type Err = StabError;

    /// Parses a dense Pauli string like `+XYZ_` or `-XX`. The sign prefix is
    /// optional and defaults to `+`; `I` and `_` both mean identity.
    fn from_str(text: &str) -> StabResult<Self> {
        let invalid = |position: usize, character: char| StabError::InvalidPauliCharacter {
            character,
            position,
            text: text.to_string(),
        };

        let mut chars = text.char_indices().peekable();
        let mut sign = false;
        if let Some(&(_, c)) = chars.peek() {
            if c == '+' || c == '-' {
                sign = c == '-';
                chars.next();
            }
        }

        let body: Vec<(usize, char)> = chars.collect();
        let mut result = PauliString::identity(body.len());
        result.sign = sign;
        for (k, (position, c)) in body.iter().enumerate() {
            let p = match c {
                'I' | '_' => Pauli::I,
                'X' => Pauli::X,
                'Y' => Pauli::Y,
                'Z' => Pauli::Z,
                other => return Err(invalid(*position, *other)),
            };
            result.set(k, p);
        }
        Ok(result)
    }
}

/// Word-level core of the i-phase-tracking right multiplication.
///
/// XORs (x2, z2) into (x1, z1) while counting, mod 4, the anticommutations at
/// each bit position via two accumulator words. Returns the phase exponent of
/// `i` (mod 4) contributed by the component products; the caller folds in the
/// right-hand sign.
pub fn mul_words_with_phase(x1: &mut [u64], z1: &mut [u64], x2: &[u64], z2: &[u64]) -> u8 {
    debug_assert!(x1.len() == z1.len() && x1.len() == x2.len() && x1.len() == z2.len());

    let mut cnt1: u64 = 0;
    let mut cnt2: u64 = 0;
    for k in 0..x1.len() {
        let old_x1 = x1[k];
        let old_z1 = z1[k];
        x1[k] ^= x2[k];
        z1[k] ^= z2[k];

        let x1z2 = old_x1 & z2[k];
        let anti_commutes = (x2[k] & old_z1) ^ x1z2;
        cnt2 ^= (cnt1 ^ x1[k] ^ z1[k] ^ x1z2) & anti_commutes;
        cnt1 ^= anti_commutes;
    }

    let mut s = (cnt1.count_ones() & 1) as u8;
    s += ((cnt2.count_ones() & 1) as u8) << 1;
    s & 3
}

/// Word-level commutation test: even parity of `(x1 AND z2) XOR (x2 AND z1)`.
pub fn commutes_words(x1: &[u64], z1: &[u64], x2: &[u64], z2: &[u64]) -> bool {
    let mut cnt = 0u64;
    for k in 0..x1.len() {
        cnt ^= (x1[k] & z2[k]) ^ (x2[k] & z1[k]);
    }
    cnt.count_ones() & 1 == 0
}
