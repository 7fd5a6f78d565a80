//! Clifford tableaus: the images of the single-qubit Pauli generators under a
//! Clifford unitary.

use rand::Rng;
use skuld_bits::{BitTable, SimdBits, bits_to_words};

use crate::error::{StabError, StabResult};
use crate::pauli::{PauliString, commutes_words, mul_words_with_phase};

/// Selects the X-image or Z-image half of a tableau.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    X,
    Z,
}

/// One half of a tableau: the images of every X (or every Z) generator.
///
/// Row `j` of `xt` holds the X components of the image of generator `j`; row
/// `j` of `zt` holds the Z components; bit `j` of `signs` its sign.
#[derive(Clone, PartialEq, Eq)]
pub struct TableauHalf {
    pub xt: BitTable,
    pub zt: BitTable,
    pub signs: SimdBits,
    num_qubits: usize,
}

impl TableauHalf {
    fn identity(num_qubits: usize, z_diagonal: bool) -> Self {
        let mut half = Self {
            xt: BitTable::new(num_qubits, num_qubits),
            zt: BitTable::new(num_qubits, num_qubits),
            signs: SimdBits::new(num_qubits),
            num_qubits,
        };
        for k in 0..num_qubits {
            if z_diagonal {
                half.zt.set(k, k, true);
            } else {
                half.xt.set(k, k, true);
            }
        }
        half
    }

    /// Copies out row `q` as a signed Pauli string.
    pub fn row_pauli(&self, q: usize) -> PauliString {
        let mut result = PauliString::identity(self.num_qubits);
        result.xs.as_words_mut().copy_from_slice(self.xt.row(q));
        result.zs.as_words_mut().copy_from_slice(self.zt.row(q));
        result.sign = self.signs.get(q);
        result
    }

    fn set_row(&mut self, q: usize, value: &PauliString) {
        debug_assert_eq!(value.num_qubits(), self.num_qubits);
        self.xt.row_mut(q).copy_from_slice(value.xs.as_words());
        self.zt.row_mut(q).copy_from_slice(value.zs.as_words());
        self.signs.set(q, value.sign);
    }
}

/// A Clifford unitary on `n` qubits, stored as the images `U Xⱼ U†` (the
/// [`Half::X`] half) and `U Zⱼ U†` (the [`Half::Z`] half).
///
/// Gate application comes in two directions:
/// - `prepend_*` composes a gate *before* the represented operation
///   (`U ← U · g`), implemented as word-parallel row operations.
/// - `append_*` via [`Tableau::inplace_scatter_append`] composes a gate
///   *after* (`U ← g · U`), implemented by rewriting each image through the
///   gate's conjugation action.
#[derive(Clone, PartialEq, Eq)]
pub struct Tableau {
    num_qubits: usize,
    pub xs: TableauHalf,
    pub zs: TableauHalf,
}

impl Tableau {
    /// The identity operation on `num_qubits` qubits.
    pub fn identity(num_qubits: usize) -> Self {
        Self {
            num_qubits,
            xs: TableauHalf::identity(num_qubits, false),
            zs: TableauHalf::identity(num_qubits, true),
        }
    }

    /// Builds a single-qubit operation from its X and Z images.
    pub fn gate1(x_image: &str, z_image: &str) -> StabResult<Self> {
        let mut t = Tableau::identity(1);
        t.xs.set_row(0, &parse_image(x_image, 1)?);
        t.zs.set_row(0, &parse_image(z_image, 1)?);
        if !t.satisfies_invariants() {
            return Err(StabError::BrokenInvariants);
        }
        Ok(t)
    }

    /// Builds a two-qubit operation from the images of X₀, Z₀, X₁, Z₁.
    pub fn gate2(x0: &str, z0: &str, x1: &str, z1: &str) -> StabResult<Self> {
        let mut t = Tableau::identity(2);
        t.xs.set_row(0, &parse_image(x0, 2)?);
        t.zs.set_row(0, &parse_image(z0, 2)?);
        t.xs.set_row(1, &parse_image(x1, 2)?);
        t.zs.set_row(1, &parse_image(z1, 2)?);
        if !t.satisfies_invariants() {
            return Err(StabError::BrokenInvariants);
        }
        Ok(t)
    }

    #[inline]
    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    /// The image of Xq.
    pub fn x_image(&self, q: usize) -> PauliString {
        self.xs.row_pauli(q)
    }

    /// The image of Zq.
    pub fn z_image(&self, q: usize) -> PauliString {
        self.zs.row_pauli(q)
    }

    /// The image of Yq, derived from the X and Z images (`Y = iXZ`).
    pub fn eval_y_obs(&self, q: usize) -> PauliString {
        let mut result = self.x_image(q);
        let mut log_i = result.inplace_right_mul_with_phase(&self.z_image(q));
        log_i += 1;
        debug_assert_eq!(log_i & 1, 0);
        result.sign ^= log_i & 2 != 0;
        result
    }

    fn half(&self, h: Half) -> &TableauHalf {
        match h {
            Half::X => &self.xs,
            Half::Z => &self.zs,
        }
    }

    fn half_mut(&mut self, h: Half) -> &mut TableauHalf {
        match h {
            Half::X => &mut self.xs,
            Half::Z => &mut self.zs,
        }
    }

    /// Overwrites one generator image.
    pub fn set_row(&mut self, h: Half, q: usize, value: &PauliString) {
        self.half_mut(h).set_row(q, value);
    }

    /// Row product `dst ← dst · src` over generator images, folding the
    /// resulting i-phase's real part into the destination sign and ignoring
    /// its imaginary part (used by the square-root gate updates, whose
    /// leftover `i` is an intentional global phase).
    fn row_mul(&mut self, dst: (Half, usize), src: (Half, usize)) {
        let log_i = if dst.0 == src.0 {
            let half = self.half_mut(dst.0);
            let src_sign = half.signs.get(src.1);
            let TableauHalf { xt, zt, .. } = half;
            let (x1, x2) = xt.two_rows_mut(dst.1, src.1);
            let (z1, z2) = zt.two_rows_mut(dst.1, src.1);
            mul_words_with_phase(x1, z1, x2, z2) + ((src_sign as u8) << 1)
        } else {
            let (dh, sh) = match dst.0 {
                Half::X => (&mut self.xs, &self.zs),
                Half::Z => (&mut self.zs, &self.xs),
            };
            let src_sign = sh.signs.get(src.1);
            let TableauHalf { xt, zt, .. } = dh;
            mul_words_with_phase(
                xt.row_mut(dst.1),
                zt.row_mut(dst.1),
                sh.xt.row(src.1),
                sh.zt.row(src.1),
            ) + ((src_sign as u8) << 1)
        };
        self.half_mut(dst.0).signs.xor_bit(dst.1, log_i & 2 != 0);
    }

    /// Swaps two generator images.
    fn row_swap(&mut self, a: (Half, usize), b: (Half, usize)) {
        if a.0 == b.0 {
            if a.1 == b.1 {
                return;
            }
            let half = self.half_mut(a.0);
            half.xt.swap_rows(a.1, b.1);
            half.zt.swap_rows(a.1, b.1);
            let sa = half.signs.get(a.1);
            let sb = half.signs.get(b.1);
            half.signs.set(a.1, sb);
            half.signs.set(b.1, sa);
        } else {
            let (xs, zs) = (&mut self.xs, &mut self.zs);
            let (ha, hb, qa, qb) = match a.0 {
                Half::X => (xs, zs, a.1, b.1),
                Half::Z => (zs, xs, a.1, b.1),
            };
            ha.xt.row_mut(qa).swap_with_slice(hb.xt.row_mut(qb));
            ha.zt.row_mut(qa).swap_with_slice(hb.zt.row_mut(qb));
            let sa = ha.signs.get(qa);
            let sb = hb.signs.get(qb);
            ha.signs.set(qa, sb);
            hb.signs.set(qb, sa);
        }
    }

    // =========================================================================
    // Gate-before composition (word-parallel row operations).
    // =========================================================================

    pub fn prepend_x(&mut self, q: usize) {
        self.zs.signs.xor_bit(q, true);
    }

    pub fn prepend_y(&mut self, q: usize) {
        self.xs.signs.xor_bit(q, true);
        self.zs.signs.xor_bit(q, true);
    }

    pub fn prepend_z(&mut self, q: usize) {
        self.xs.signs.xor_bit(q, true);
    }

    /// Composes a whole Pauli operator before the represented operation.
    pub fn prepend_pauli(&mut self, op: &PauliString) {
        debug_assert_eq!(op.num_qubits(), self.num_qubits);
        for (s, x) in self.zs.signs.as_words_mut().iter_mut().zip(op.xs.as_words()) {
            *s ^= x;
        }
        for (s, z) in self.xs.signs.as_words_mut().iter_mut().zip(op.zs.as_words()) {
            *s ^= z;
        }
    }

    pub fn prepend_h_xz(&mut self, q: usize) {
        self.row_swap((Half::X, q), (Half::Z, q));
    }

    pub fn prepend_h_yz(&mut self, q: usize) {
        self.row_mul((Half::Z, q), (Half::X, q));
        self.prepend_z(q);
    }

    pub fn prepend_h_xy(&mut self, q: usize) {
        self.row_mul((Half::X, q), (Half::Z, q));
        self.prepend_y(q);
    }

    pub fn prepend_c_xyz(&mut self, q: usize) {
        self.row_mul((Half::Z, q), (Half::X, q));
        self.row_swap((Half::X, q), (Half::Z, q));
    }

    pub fn prepend_c_zyx(&mut self, q: usize) {
        self.row_swap((Half::X, q), (Half::Z, q));
        self.row_mul((Half::Z, q), (Half::X, q));
        self.prepend_x(q);
    }

    pub fn prepend_sqrt_x(&mut self, q: usize) {
        self.prepend_sqrt_x_dag(q);
        self.prepend_x(q);
    }

    pub fn prepend_sqrt_x_dag(&mut self, q: usize) {
        self.row_mul((Half::Z, q), (Half::X, q));
    }

    pub fn prepend_sqrt_y(&mut self, q: usize) {
        self.zs.signs.xor_bit(q, true);
        self.row_swap((Half::X, q), (Half::Z, q));
    }

    pub fn prepend_sqrt_y_dag(&mut self, q: usize) {
        self.row_swap((Half::X, q), (Half::Z, q));
        self.zs.signs.xor_bit(q, true);
    }

    pub fn prepend_sqrt_z(&mut self, q: usize) {
        self.prepend_sqrt_z_dag(q);
        self.prepend_z(q);
    }

    pub fn prepend_sqrt_z_dag(&mut self, q: usize) {
        self.row_mul((Half::X, q), (Half::Z, q));
    }

    pub fn prepend_swap(&mut self, q1: usize, q2: usize) {
        self.row_swap((Half::Z, q1), (Half::Z, q2));
        self.row_swap((Half::X, q1), (Half::X, q2));
    }

    pub fn prepend_iswap(&mut self, q1: usize, q2: usize) {
        self.prepend_swap(q1, q2);
        self.prepend_zcz(q1, q2);
        self.prepend_sqrt_z(q1);
        self.prepend_sqrt_z(q2);
    }

    pub fn prepend_iswap_dag(&mut self, q1: usize, q2: usize) {
        self.prepend_swap(q1, q2);
        self.prepend_zcz(q1, q2);
        self.prepend_sqrt_z_dag(q1);
        self.prepend_sqrt_z_dag(q2);
    }

    pub fn prepend_zcx(&mut self, control: usize, target: usize) {
        self.row_mul((Half::Z, target), (Half::Z, control));
        self.row_mul((Half::X, control), (Half::X, target));
    }

    pub fn prepend_zcy(&mut self, control: usize, target: usize) {
        self.prepend_h_yz(target);
        self.prepend_zcz(control, target);
        self.prepend_h_yz(target);
    }

    pub fn prepend_zcz(&mut self, control: usize, target: usize) {
        self.row_mul((Half::X, target), (Half::Z, control));
        self.row_mul((Half::X, control), (Half::Z, target));
    }

    pub fn prepend_xcx(&mut self, control: usize, target: usize) {
        self.row_mul((Half::Z, target), (Half::X, control));
        self.row_mul((Half::Z, control), (Half::X, target));
    }

    pub fn prepend_xcy(&mut self, control: usize, target: usize) {
        self.prepend_h_xy(target);
        self.prepend_xcx(control, target);
        self.prepend_h_xy(target);
    }

    pub fn prepend_xcz(&mut self, control: usize, target: usize) {
        self.prepend_zcx(target, control);
    }

    pub fn prepend_ycx(&mut self, control: usize, target: usize) {
        self.prepend_xcy(target, control);
    }

    pub fn prepend_ycy(&mut self, control: usize, target: usize) {
        self.prepend_h_yz(control);
        self.prepend_h_yz(target);
        self.prepend_zcz(control, target);
        self.prepend_h_yz(target);
        self.prepend_h_yz(control);
    }

    pub fn prepend_ycz(&mut self, control: usize, target: usize) {
        self.prepend_zcy(target, control);
    }

    pub fn prepend_sqrt_xx(&mut self, q1: usize, q2: usize) {
        self.prepend_sqrt_xx_dag(q1, q2);
        self.prepend_x(q1);
        self.prepend_x(q2);
    }

    pub fn prepend_sqrt_xx_dag(&mut self, q1: usize, q2: usize) {
        self.row_mul((Half::Z, q1), (Half::X, q1));
        self.row_mul((Half::Z, q1), (Half::X, q2));
        self.row_mul((Half::Z, q2), (Half::X, q1));
        self.row_mul((Half::Z, q2), (Half::X, q2));
    }

    pub fn prepend_sqrt_yy(&mut self, q1: usize, q2: usize) {
        self.prepend_sqrt_yy_dag(q1, q2);
        self.prepend_y(q1);
        self.prepend_y(q2);
    }

    pub fn prepend_sqrt_yy_dag(&mut self, q1: usize, q2: usize) {
        self.row_mul((Half::X, q1), (Half::Z, q1));
        self.row_mul((Half::Z, q1), (Half::Z, q2));
        self.row_mul((Half::Z, q1), (Half::X, q2));
        self.row_mul((Half::X, q2), (Half::X, q1));
        self.row_mul((Half::Z, q2), (Half::X, q1));
        self.row_mul((Half::X, q1), (Half::Z, q1));
        self.row_swap((Half::X, q1), (Half::Z, q1));
        self.row_swap((Half::X, q2), (Half::Z, q2));
        self.prepend_z(q2);
    }

    pub fn prepend_sqrt_zz(&mut self, q1: usize, q2: usize) {
        self.prepend_sqrt_zz_dag(q1, q2);
        self.prepend_z(q1);
        self.prepend_z(q2);
    }

    pub fn prepend_sqrt_zz_dag(&mut self, q1: usize, q2: usize) {
        self.row_mul((Half::X, q1), (Half::Z, q1));
        self.row_mul((Half::X, q1), (Half::Z, q2));
        self.row_mul((Half::X, q2), (Half::Z, q1));
        self.row_mul((Half::X, q2), (Half::Z, q2));
    }

    // =========================================================================
    // Evaluation and gate-after composition.
    // =========================================================================

    fn mul_pauli_by_row(&self, acc: &mut PauliString, h: Half, q: usize) -> u8 {
        let half = self.half(h);
        let log_i = mul_words_with_phase(
            acc.xs.as_words_mut(),
            acc.zs.as_words_mut(),
            half.xt.row(q),
            half.zt.row(q),
        );
        (log_i + ((half.signs.get(q) as u8) << 1)) & 3
    }

    /// The image of an arbitrary Pauli operator under the represented
    /// Clifford: the signed product of the generator images it contains.
    pub fn eval(&self, p: &PauliString) -> PauliString {
        debug_assert_eq!(p.num_qubits(), self.num_qubits);
        let mut result = PauliString::identity(self.num_qubits);
        result.sign = p.sign;
        let mut log_i: u8 = 0;
        for q in 0..self.num_qubits {
            let x = p.xs.get(q);
            let z = p.zs.get(q);
            if x {
                log_i = log_i.wrapping_add(self.mul_pauli_by_row(&mut result, Half::X, q));
            }
            if z {
                log_i = log_i.wrapping_add(self.mul_pauli_by_row(&mut result, Half::Z, q));
                if x {
                    // The Y component contributed an extra i (Y = iXZ).
                    log_i = log_i.wrapping_add(1);
                }
            }
        }
        debug_assert_eq!(log_i & 1, 0, "image of a Hermitian Pauli must be Hermitian");
        result.sign ^= log_i & 2 != 0;
        result
    }

    /// Evaluates a small Pauli whose qubit `k` refers to this tableau's qubit
    /// `scattered_indices[k]`.
    pub fn scatter_eval(&self, gathered: &PauliString, scattered_indices: &[usize]) -> PauliString {
        debug_assert_eq!(gathered.num_qubits(), scattered_indices.len());
        let mut result = PauliString::identity(self.num_qubits);
        result.sign = gathered.sign;
        let mut log_i: u8 = 0;
        for (k, &q) in scattered_indices.iter().enumerate() {
            let x = gathered.xs.get(k);
            let z = gathered.zs.get(k);
            if x {
                log_i = log_i.wrapping_add(self.mul_pauli_by_row(&mut result, Half::X, q));
            }
            if z {
                log_i = log_i.wrapping_add(self.mul_pauli_by_row(&mut result, Half::Z, q));
                if x {
                    log_i = log_i.wrapping_add(1);
                }
            }
        }
        debug_assert_eq!(log_i & 1, 0);
        result.sign ^= log_i & 2 != 0;
        result
    }

    /// Composition: the operation that applies `self` first, then `second`.
    pub fn then(&self, second: &Tableau) -> Tableau {
        assert_eq!(self.num_qubits, second.num_qubits);
        let mut result = Tableau::identity(self.num_qubits);
        for q in 0..self.num_qubits {
            result.xs.set_row(q, &second.eval(&self.x_image(q)));
            result.zs.set_row(q, &second.eval(&self.z_image(q)));
        }
        result
    }

    /// Composes `operation` (on `target_qubits`) after the represented
    /// operation, by rewriting every generator image through it.
    pub fn inplace_scatter_append(&mut self, operation: &Tableau, target_qubits: &[usize]) {
        debug_assert_eq!(operation.num_qubits, target_qubits.len());
        let mut gathered = PauliString::identity(operation.num_qubits);
        for h in [Half::X, Half::Z] {
            for j in 0..self.num_qubits {
                {
                    let half = self.half(h);
                    for (k, &t) in target_qubits.iter().enumerate() {
                        gathered.xs.set(k, half.xt.get(j, t));
                        gathered.zs.set(k, half.zt.get(j, t));
                    }
                    gathered.sign = false;
                }
                let new_value = operation.eval(&gathered);
                let half = self.half_mut(h);
                for (k, &t) in target_qubits.iter().enumerate() {
                    half.xt.set(j, t, new_value.xs.get(k));
                    half.zt.set(j, t, new_value.zs.get(k));
                }
                half.signs.xor_bit(j, new_value.sign);
            }
        }
    }

    /// Composes `operation` (on `target_qubits`) before the represented
    /// operation, by replacing the target generators' images.
    pub fn inplace_scatter_prepend(&mut self, operation: &Tableau, target_qubits: &[usize]) {
        debug_assert_eq!(operation.num_qubits, target_qubits.len());
        let new_x: Vec<PauliString> = (0..operation.num_qubits)
            .map(|k| self.scatter_eval(&operation.x_image(k), target_qubits))
            .collect();
        let new_z: Vec<PauliString> = (0..operation.num_qubits)
            .map(|k| self.scatter_eval(&operation.z_image(k), target_qubits))
            .collect();
        for (k, &t) in target_qubits.iter().enumerate() {
            self.xs.set_row(t, &new_x[k]);
            self.zs.set_row(t, &new_z[k]);
        }
    }

    // =========================================================================
    // Structure.
    // =========================================================================

    /// Checks that the images are independent and preserve the generator
    /// commutation table: each Xⱼ image anticommutes with its Zⱼ image and
    /// commutes with every other image.
    pub fn satisfies_invariants(&self) -> bool {
        let n = self.num_qubits;
        for i in 0..n {
            for j in i..n {
                let xi = (self.xs.xt.row(i), self.xs.zt.row(i));
                let zi = (self.zs.xt.row(i), self.zs.zt.row(i));
                let xj = (self.xs.xt.row(j), self.xs.zt.row(j));
                let zj = (self.zs.xt.row(j), self.zs.zt.row(j));
                if i == j {
                    if commutes_words(xi.0, xi.1, zi.0, zi.1) {
                        return false;
                    }
                } else {
                    if !commutes_words(xi.0, xi.1, xj.0, xj.1)
                        || !commutes_words(xi.0, xi.1, zj.0, zj.1)
                        || !commutes_words(zi.0, zi.1, xj.0, xj.1)
                        || !commutes_words(zi.0, zi.1, zj.0, zj.1)
                    {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// The inverse operation: the tableau `T'` with `self.then(&T')` equal to
    /// the identity.
    ///
    /// The unsigned part is the symplectic inverse (quadrant transposes with
    /// a diagonal swap); each sign is then fixed by evaluating the candidate
    /// image back through `self`.
    pub fn inverse(&self) -> StabResult<Tableau> {
        if !self.satisfies_invariants() {
            return Err(StabError::BrokenInvariants);
        }
        let n = self.num_qubits;
        let mut result = Tableau::identity(n);

        result.xs.xt = self.zs.zt.clone();
        result.xs.zt = self.xs.zt.clone();
        result.zs.xt = self.zs.xt.clone();
        result.zs.zt = self.xs.xt.clone();
        result.xs.xt.do_square_transpose();
        result.xs.zt.do_square_transpose();
        result.zs.xt.do_square_transpose();
        result.zs.zt.do_square_transpose();

        // Candidate images are unsigned; evaluating each back through `self`
        // yields ±(generator), and the sign is copied so they cancel.
        for q in 0..n {
            let image = self.eval(&result.x_image(q));
            debug_assert!(image.xs.get(q) && !image.zs.get(q) && image.weight() == 1);
            result.xs.signs.set(q, image.sign);

            let image = self.eval(&result.z_image(q));
            debug_assert!(!image.xs.get(q) && image.zs.get(q) && image.weight() == 1);
            result.zs.signs.set(q, image.sign);
        }
        Ok(result)
    }

    /// Physically transposes the four quadrant matrices in place so that
    /// per-qubit columns become contiguous rows. Symmetric: applying twice
    /// restores the layout. Use [`crate::TransposedTableau`] rather than
    /// calling this directly.
    pub fn do_transpose_quadrants(&mut self) {
        self.xs.xt.do_square_transpose();
        self.xs.zt.do_square_transpose();
        self.zs.xt.do_square_transpose();
        self.zs.zt.do_square_transpose();
    }

    /// Grows the tableau to `new_num_qubits`, with new qubits acting as
    /// identity.
    pub fn expand(&mut self, new_num_qubits: usize) {
        assert!(new_num_qubits >= self.num_qubits);
        if new_num_qubits == self.num_qubits {
            return;
        }
        let old_words = bits_to_words(self.num_qubits);
        let mut new_t = Tableau::identity(new_num_qubits);
        for q in 0..self.num_qubits {
            new_t.xs.xt.row_mut(q)[..old_words].copy_from_slice(self.xs.xt.row(q));
            new_t.xs.zt.row_mut(q)[..old_words].copy_from_slice(self.xs.zt.row(q));
            new_t.zs.xt.row_mut(q)[..old_words].copy_from_slice(self.zs.xt.row(q));
            new_t.zs.zt.row_mut(q)[..old_words].copy_from_slice(self.zs.zt.row(q));
        }
        new_t.xs.signs.truncated_overwrite_from(&self.xs.signs, self.num_qubits);
        new_t.zs.signs.truncated_overwrite_from(&self.zs.signs, self.num_qubits);
        *self = new_t;
    }

    /// Samples a tableau uniformly from the Clifford group on `num_qubits`
    /// qubits.
    ///
    /// Uses the Bravyi–Maslov canonical form `F1 · H · S · F2`: a
    /// quantum-Mallows-sampled Hadamard/permutation layer between two
    /// Hadamard-free layers, plus a uniform Pauli layer for the signs. The
    /// sampled layers are realized as gates applied to an identity tableau.
    pub fn random<R: Rng>(num_qubits: usize, rng: &mut R) -> Tableau {
        let n = num_qubits;
        let mut t = Tableau::identity(n);
        if n == 0 {
            return t;
        }

        let (hadamards, perm) = sample_quantum_mallows(n, rng);

        let mut gamma1 = vec![vec![false; n]; n];
        let mut delta1 = vec![vec![false; n]; n];
        let mut gamma2 = vec![vec![false; n]; n];
        let mut delta2 = vec![vec![false; n]; n];
        for i in 0..n {
            delta1[i][i] = true;
            delta2[i][i] = true;
            gamma2[i][i] = rng.r#gen();
            if hadamards[i] {
                gamma1[i][i] = rng.r#gen();
            }
        }
        for i in 1..n {
            for j in 0..i {
                // The second layer is unconstrained.
                let b: bool = rng.r#gen();
                gamma2[i][j] = b;
                gamma2[j][i] = b;
                delta2[i][j] = rng.r#gen();

                // The first layer's freedom depends on the Hadamard layer and
                // the permutation (canonical-form constraints).
                let (h_i, h_j) = (hadamards[i], hadamards[j]);
                let (s_i, s_j) = (perm[i], perm[j]);
                if ((s_i < s_j || h_j) && h_i) || (h_j && s_j < s_i) {
                    let b: bool = rng.r#gen();
                    gamma1[i][j] = b;
                    gamma1[j][i] = b;
                }
                if (s_i < s_j || h_j) && (s_i > s_j || !h_i) && (h_j || !h_i) {
                    delta1[i][j] = rng.r#gen();
                }
            }
        }

        // Emit the layers in temporal order, then apply in reverse so each
        // gate composes before the ones already included.
        let mut gates: Vec<LayerGate> = vec![];
        push_hadamard_free_layer(&mut gates, n, &gamma2, &delta2);
        for i in 0..n {
            let (z, x): (bool, bool) = (rng.r#gen(), rng.r#gen());
            match (x, z) {
                (true, true) => gates.push(LayerGate::Y(i)),
                (false, true) => gates.push(LayerGate::Z(i)),
                (true, false) => gates.push(LayerGate::X(i)),
                (false, false) => {}
            }
        }
        push_permutation_layer(&mut gates, &perm);
        for (i, &h) in hadamards.iter().enumerate() {
            if h {
                gates.push(LayerGate::H(i));
            }
        }
        push_hadamard_free_layer(&mut gates, n, &gamma1, &delta1);

        for gate in gates.iter().rev() {
            match *gate {
                LayerGate::H(q) => t.prepend_h_xz(q),
                LayerGate::S(q) => t.prepend_sqrt_z(q),
                LayerGate::Cz(a, b) => t.prepend_zcz(a, b),
                LayerGate::Cx(c, tq) => t.prepend_zcx(c, tq),
                LayerGate::Swap(a, b) => t.prepend_swap(a, b),
                LayerGate::X(q) => t.prepend_x(q),
                LayerGate::Y(q) => t.prepend_y(q),
                LayerGate::Z(q) => t.prepend_z(q),
            }
        }
        t
    }
}

impl std::fmt::Debug for Tableau {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for q in 0..self.num_qubits {
            writeln!(f, "X{q} -> {}", self.x_image(q))?;
            writeln!(f, "Z{q} -> {}", self.z_image(q))?;
        }
        Ok(())
    }
}

fn parse_image(text: &str, expected: usize) -> StabResult<PauliString> {
    let p: PauliString = text.parse()?;
    if p.num_qubits() != expected {
        return Err(StabError::LengthMismatch {
            expected,
            got: p.num_qubits(),
        });
    }
    Ok(p)
}

enum LayerGate {
    H(usize),
    S(usize),
    Cz(usize, usize),
    Cx(usize, usize),
    Swap(usize, usize),
    X(usize),
    Y(usize),
    Z(usize),
}

/// Samples the Hadamard mask and permutation of the canonical form from the
/// quantum Mallows distribution.
fn sample_quantum_mallows<R: Rng>(n: usize, rng: &mut R) -> (Vec<bool>, Vec<usize>) {
    let mut hadamards = vec![false; n];
    let mut perm = vec![0usize; n];
    let mut available: Vec<usize> = (0..n).collect();

    for i in 0..n {
        let m = n - i;
        let r: f64 = rng.r#gen();
        // Inverse-transform sample of P(a) ∝ 2^{-a} over a ∈ [1, 2m].
        // Past ~500 qubits 4^m overflows, but there the +1/-1 terms are far
        // below f64 precision anyway, so log2 distributes over the product.
        let ceil_log = if m > 500 {
            (r.log2() + 2.0 * m as f64).ceil()
        } else {
            (r * (4.0f64.powi(m as i32) - 1.0) + 1.0).log2().ceil()
        };
        let ceil_log = ceil_log.clamp(0.0, (2 * m) as f64) as usize;
        let a = (2 * m + 1 - ceil_log).clamp(1, 2 * m);

        let k = if a <= m {
            hadamards[i] = true;
            a - 1
        } else {
            hadamards[i] = false;
            2 * m - a
        };
        perm[i] = available.remove(k.min(available.len() - 1));
    }
    (hadamards, perm)
}

/// Emits a Hadamard-free layer in temporal order: CNOTs from the triangular
/// matrix, then CZ/S from the symmetric matrix.
fn push_hadamard_free_layer(
    gates: &mut Vec<LayerGate>,
    n: usize,
    gamma: &[Vec<bool>],
    delta: &[Vec<bool>],
) {
    for j in 0..n {
        for i in j + 1..n {
            if delta[i][j] {
                gates.push(LayerGate::Cx(j, i));
            }
        }
    }
    for i in 0..n {
        if gamma[i][i] {
            gates.push(LayerGate::S(i));
        }
        for j in 0..i {
            if gamma[i][j] {
                gates.push(LayerGate::Cz(i, j));
            }
        }
    }
}

/// Emits SWAPs realizing the sampled permutation, in temporal order.
fn push_permutation_layer(gates: &mut Vec<LayerGate>, perm: &[usize]) {
    let n = perm.len();
    let mut p: Vec<usize> = (0..n).collect();
    for i in 0..n {
        if p[i] != perm[i] {
            let j = p.iter().position(|&x| x == perm[i]).unwrap();
            gates.push(LayerGate::Swap(i, j));
            p.swap(i, j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rustc_hash::FxHashMap;

    fn h_gate() -> Tableau {
        Tableau::gate1("+Z", "+X").unwrap()
    }

    fn s_gate() -> Tableau {
        Tableau::gate1("+Y", "+Z").unwrap()
    }

    fn cx_gate() -> Tableau {
        Tableau::gate2("+XX", "+Z_", "+_X", "+ZZ").unwrap()
    }

    #[test]
    fn test_identity_invariants() {
        for n in [0, 1, 5, 64, 65, 130] {
            let t = Tableau::identity(n);
            assert!(t.satisfies_invariants());
            for q in 0..n {
                assert_eq!(t.x_image(q).get(q), crate::Pauli::X);
                assert_eq!(t.z_image(q).get(q), crate::Pauli::Z);
            }
        }
    }

    #[test]
    fn test_gate_constructors_reject_non_cliffords() {
        assert!(Tableau::gate1("+X", "+X").is_err());
        assert!(Tableau::gate1("+XX", "+Z").is_err());
        assert!(Tableau::gate1("+Q", "+Z").is_err());
    }

    #[test]
    fn test_prepend_h_on_identity() {
        let mut t = Tableau::identity(2);
        t.prepend_h_xz(1);
        assert_eq!(t.x_image(1).to_string(), "+_Z");
        assert_eq!(t.z_image(1).to_string(), "+_X");
        assert_eq!(t.x_image(0).to_string(), "+X_");
    }

    #[test]
    fn test_prepend_s_on_identity() {
        let mut t = Tableau::identity(1);
        t.prepend_sqrt_z(0);
        // S X S† = Y, S Z S† = Z.
        assert_eq!(t.x_image(0).to_string(), "+Y");
        assert_eq!(t.z_image(0).to_string(), "+Z");
        t.prepend_sqrt_z(0);
        // Z X Z = -X.
        assert_eq!(t.x_image(0).to_string(), "-X");
    }

    #[test]
    fn test_prepend_cx_on_identity() {
        let mut t = Tableau::identity(2);
        t.prepend_zcx(0, 1);
        assert_eq!(t.x_image(0).to_string(), "+XX");
        assert_eq!(t.z_image(0).to_string(), "+Z_");
        assert_eq!(t.x_image(1).to_string(), "+_X");
        assert_eq!(t.z_image(1).to_string(), "+ZZ");
    }

    #[test]
    fn test_single_qubit_prepends_preserve_invariants() {
        let ops: Vec<(&str, fn(&mut Tableau, usize))> = vec![
            ("h_xz", Tableau::prepend_h_xz),
            ("h_xy", Tableau::prepend_h_xy),
            ("h_yz", Tableau::prepend_h_yz),
            ("c_xyz", Tableau::prepend_c_xyz),
            ("c_zyx", Tableau::prepend_c_zyx),
            ("sqrt_x", Tableau::prepend_sqrt_x),
            ("sqrt_x_dag", Tableau::prepend_sqrt_x_dag),
            ("sqrt_y", Tableau::prepend_sqrt_y),
            ("sqrt_y_dag", Tableau::prepend_sqrt_y_dag),
            ("sqrt_z", Tableau::prepend_sqrt_z),
            ("sqrt_z_dag", Tableau::prepend_sqrt_z_dag),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        for (name, op) in ops {
            let mut t = Tableau::random(7, &mut rng);
            op(&mut t, 3);
            assert!(t.satisfies_invariants(), "{name} broke invariants");
        }
    }

    #[test]
    fn test_two_qubit_prepends_preserve_invariants() {
        let ops: Vec<(&str, fn(&mut Tableau, usize, usize))> = vec![
            ("swap", Tableau::prepend_swap),
            ("iswap", Tableau::prepend_iswap),
            ("iswap_dag", Tableau::prepend_iswap_dag),
            ("zcx", Tableau::prepend_zcx),
            ("zcy", Tableau::prepend_zcy),
            ("zcz", Tableau::prepend_zcz),
            ("xcx", Tableau::prepend_xcx),
            ("xcy", Tableau::prepend_xcy),
            ("xcz", Tableau::prepend_xcz),
            ("ycx", Tableau::prepend_ycx),
            ("ycy", Tableau::prepend_ycy),
            ("ycz", Tableau::prepend_ycz),
            ("sqrt_xx", Tableau::prepend_sqrt_xx),
            ("sqrt_xx_dag", Tableau::prepend_sqrt_xx_dag),
            ("sqrt_yy", Tableau::prepend_sqrt_yy),
            ("sqrt_yy_dag", Tableau::prepend_sqrt_yy_dag),
            ("sqrt_zz", Tableau::prepend_sqrt_zz),
            ("sqrt_zz_dag", Tableau::prepend_sqrt_zz_dag),
        ];
        let mut rng = StdRng::seed_from_u64(2);
        for (name, op) in ops {
            let mut t = Tableau::random(7, &mut rng);
            op(&mut t, 2, 5);
            assert!(t.satisfies_invariants(), "{name} broke invariants");
        }
    }

    #[test]
    fn test_prepend_inverse_pairs_cancel() {
        let pairs: Vec<(fn(&mut Tableau, usize), fn(&mut Tableau, usize))> = vec![
            (Tableau::prepend_sqrt_x, Tableau::prepend_sqrt_x_dag),
            (Tableau::prepend_sqrt_y, Tableau::prepend_sqrt_y_dag),
            (Tableau::prepend_sqrt_z, Tableau::prepend_sqrt_z_dag),
            (Tableau::prepend_c_xyz, Tableau::prepend_c_zyx),
            (Tableau::prepend_h_xz, Tableau::prepend_h_xz),
            (Tableau::prepend_h_xy, Tableau::prepend_h_xy),
            (Tableau::prepend_h_yz, Tableau::prepend_h_yz),
        ];
        let mut rng = StdRng::seed_from_u64(3);
        for (fwd, rev) in pairs {
            let t0 = Tableau::random(6, &mut rng);
            let mut t = t0.clone();
            fwd(&mut t, 4);
            rev(&mut t, 4);
            assert_eq!(t, t0);
        }
    }

    #[test]
    fn test_eval_matches_generator_rows() {
        let mut rng = StdRng::seed_from_u64(4);
        let t = Tableau::random(8, &mut rng);
        for q in 0..8 {
            let mut x = PauliString::identity(8);
            x.set(q, crate::Pauli::X);
            assert_eq!(t.eval(&x), t.x_image(q));
            let mut z = PauliString::identity(8);
            z.set(q, crate::Pauli::Z);
            assert_eq!(t.eval(&z), t.z_image(q));
            let mut y = PauliString::identity(8);
            y.set(q, crate::Pauli::Y);
            assert_eq!(t.eval(&y), t.eval_y_obs(q));
        }
    }

    #[test]
    fn test_eval_is_multiplicative() {
        let mut rng = StdRng::seed_from_u64(5);
        let t = Tableau::random(10, &mut rng);
        for _ in 0..20 {
            let a = PauliString::random(10, &mut rng);
            let b = PauliString::random(10, &mut rng);
            if !a.commutes(&b) {
                continue;
            }
            let mut ab = a.clone();
            ab *= &b;
            let mut img = t.eval(&a);
            img *= &t.eval(&b);
            assert_eq!(t.eval(&ab), img);
        }
    }

    #[test]
    fn test_then_identity_and_associativity() {
        let mut rng = StdRng::seed_from_u64(6);
        let i = Tableau::identity(6);
        let a = Tableau::random(6, &mut rng);
        let b = Tableau::random(6, &mut rng);
        let c = Tableau::random(6, &mut rng);
        assert_eq!(a.then(&i), a);
        assert_eq!(i.then(&a), a);
        assert_eq!(a.then(&b).then(&c), a.then(&b.then(&c)));
    }

    #[test]
    fn test_inverse_round_trip() {
        let mut rng = StdRng::seed_from_u64(7);
        for n in [1usize, 2, 5, 9, 64, 70] {
            let t = Tableau::random(n, &mut rng);
            let inv = t.inverse().unwrap();
            assert_eq!(t.then(&inv), Tableau::identity(n));
            assert_eq!(inv.then(&t), Tableau::identity(n));
            let inv2 = inv.inverse().unwrap();
            assert_eq!(inv2, t);
        }
    }

    #[test]
    fn test_scatter_append_matches_prepend_inverse() {
        // Composing a gate after, then its inverse before conjugates; but
        // composing after then the same gate's inverse *after* cancels.
        let mut rng = StdRng::seed_from_u64(8);
        let t0 = Tableau::random(5, &mut rng);

        let mut t = t0.clone();
        t.inplace_scatter_append(&h_gate(), &[2]);
        t.inplace_scatter_append(&h_gate(), &[2]);
        assert_eq!(t, t0);

        let s_dag = s_gate().inverse().unwrap();
        let mut t = t0.clone();
        t.inplace_scatter_append(&s_gate(), &[1]);
        t.inplace_scatter_append(&s_dag, &[1]);
        assert_eq!(t, t0);

        let cx_t = cx_gate();
        let mut t = t0.clone();
        t.inplace_scatter_append(&cx_t, &[3, 0]);
        t.inplace_scatter_append(&cx_t, &[3, 0]);
        assert_eq!(t, t0);
    }

    #[test]
    fn test_scatter_prepend_matches_row_ops() {
        let mut rng = StdRng::seed_from_u64(9);
        let t0 = Tableau::random(5, &mut rng);

        let mut a = t0.clone();
        a.inplace_scatter_prepend(&h_gate(), &[2]);
        let mut b = t0.clone();
        b.prepend_h_xz(2);
        assert_eq!(a, b);

        let mut a = t0.clone();
        a.inplace_scatter_prepend(&s_gate(), &[4]);
        let mut b = t0.clone();
        b.prepend_sqrt_z(4);
        assert_eq!(a, b);

        let mut a = t0.clone();
        a.inplace_scatter_prepend(&cx_gate(), &[1, 3]);
        let mut b = t0.clone();
        b.prepend_zcx(1, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_append_then_prepend_inverse_on_identity() {
        // Appending g to the identity and prepending g to the identity agree,
        // so appending g then prepending g's inverse restores the identity.
        let gates = [h_gate(), s_gate()];
        for g in &gates {
            let mut t = Tableau::identity(3);
            t.inplace_scatter_append(g, &[1]);
            let g_inv = g.inverse().unwrap();
            t.inplace_scatter_prepend(&g_inv, &[1]);
            assert_eq!(t, Tableau::identity(3));
        }
    }

    #[test]
    fn test_transpose_quadrants_is_an_involution() {
        let mut rng = StdRng::seed_from_u64(10);
        let t0 = Tableau::random(70, &mut rng);
        let mut t = t0.clone();
        t.do_transpose_quadrants();
        assert_eq!(t.xs.xt.get(3, 68), t0.xs.xt.get(68, 3));
        t.do_transpose_quadrants();
        assert_eq!(t, t0);
    }

    #[test]
    fn test_expand() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut t = Tableau::random(3, &mut rng);
        let x0 = t.x_image(0);
        t.expand(80);
        assert_eq!(t.num_qubits(), 80);
        assert!(t.satisfies_invariants());
        // Old content preserved on the first three qubits.
        let x0_new = t.x_image(0);
        for q in 0..3 {
            assert_eq!(x0_new.get(q), x0.get(q));
        }
        // New qubits act as identity.
        assert_eq!(t.x_image(50).sparse_str(), "+X50");
        assert_eq!(t.z_image(50).sparse_str(), "+Z50");
    }

    #[test]
    fn test_random_tableaus_satisfy_invariants() {
        let mut rng = StdRng::seed_from_u64(12);
        for n in [1usize, 2, 3, 8, 65] {
            for _ in 0..4 {
                let t = Tableau::random(n, &mut rng);
                assert!(t.satisfies_invariants(), "n={n}");
            }
        }
    }

    #[test]
    fn test_random_single_qubit_marginals_are_uniform() {
        // There are exactly 24 single-qubit Clifford operations. Sampling
        // should hit each with frequency 1/24 to within statistical error.
        let mut rng = StdRng::seed_from_u64(13);
        let shots = 48_000usize;
        let mut counts: FxHashMap<String, usize> = FxHashMap::default();
        for _ in 0..shots {
            let t = Tableau::random(1, &mut rng);
            let key = format!("{}{}", t.x_image(0), t.z_image(0));
            *counts.entry(key).or_default() += 1;
        }
        assert_eq!(counts.len(), 24);
        let expected = shots as f64 / 24.0;
        let sigma = (expected * (1.0 - 1.0 / 24.0)).sqrt();
        for (key, &count) in &counts {
            assert!(
                (count as f64 - expected).abs() < 5.0 * sigma,
                "{key}: {count} vs {expected}"
            );
        }
    }
}
