//! Scope guard that holds a tableau in transposed-quadrants layout.
//!
//! The measurement-collapse routine scans generators by qubit, which in the
//! normal row-major layout is a strided column walk. While this guard is
//! alive the four quadrant matrices are physically transposed, so per-qubit
//! data is contiguous and the collapse updates run word-parallel.
//!
//! Entering and leaving are symmetric transposes. The guard holds the only
//! mutable borrow of the tableau, so ordinary prepend/append operations are
//! statically unreachable until it is dropped; the gate updates needed during
//! collapse are provided as transposed-layout equivalents below.

use crate::pauli::PauliString;
use crate::tableau::Tableau;

/// RAII view of a [`Tableau`] with its quadrants transposed.
pub struct TransposedTableau<'a> {
    tableau: &'a mut Tableau,
}

impl<'a> TransposedTableau<'a> {
    /// Transposes the quadrants and takes ownership of the borrow.
    pub fn new(tableau: &'a mut Tableau) -> Self {
        tableau.do_transpose_quadrants();
        Self { tableau }
    }

    /// Read access to the transposed tableau. Row `q` of each quadrant holds
    /// the per-generator bits of qubit `q`.
    pub fn tableau(&self) -> &Tableau {
        self.tableau
    }

    fn for_each_column_obs<F: FnMut(&mut u64, &mut u64, &mut u64)>(&mut self, q: usize, mut body: F) {
        for half in [&mut self.tableau.xs, &mut self.tableau.zs] {
            let x_row = half.xt.row_mut(q);
            let z_row = half.zt.row_mut(q);
            let s_row = half.signs.as_words_mut();
            for k in 0..x_row.len() {
                body(&mut x_row[k], &mut z_row[k], &mut s_row[k]);
            }
        }
    }

    fn for_each_column_obs2<F: FnMut(&mut u64, &mut u64, &mut u64, &mut u64, &mut u64)>(
        &mut self,
        q1: usize,
        q2: usize,
        mut body: F,
    ) {
        for half in [&mut self.tableau.xs, &mut self.tableau.zs] {
            let (x1, x2) = half.xt.two_rows_mut(q1, q2);
            let (z1, z2) = half.zt.two_rows_mut(q1, q2);
            let s_row = half.signs.as_words_mut();
            for k in 0..x1.len() {
                body(&mut x1[k], &mut z1[k], &mut x2[k], &mut z2[k], &mut s_row[k]);
            }
        }
    }

    /// Composes a CX after the represented operation.
    pub fn append_zcx(&mut self, control: usize, target: usize) {
        self.for_each_column_obs2(control, target, |cx, cz, tx, tz, s| {
            *s ^= !(*cz ^ *tx) & (*cx & *tz);
            *cz ^= *tz;
            *tx ^= *cx;
        });
    }

    /// Composes a CY after the represented operation.
    pub fn append_zcy(&mut self, control: usize, target: usize) {
        self.for_each_column_obs2(control, target, |cx, cz, tx, tz, s| {
            *cz ^= *tx;
            *s ^= *cx & *cz & (*tx ^ *tz);
            *cz ^= *tz;
            *tx ^= *cx;
            *tz ^= *cx;
        });
    }

    /// Composes a CZ after the represented operation.
    pub fn append_zcz(&mut self, control: usize, target: usize) {
        self.for_each_column_obs2(control, target, |cx, cz, tx, tz, s| {
            *s ^= *cx & *tx & (*cz ^ *tz);
            *cz ^= *tx;
            *tz ^= *cx;
        });
    }

    /// Composes a SWAP after the represented operation.
    pub fn append_swap(&mut self, q1: usize, q2: usize) {
        self.for_each_column_obs2(q1, q2, |x1, z1, x2, z2, _s| {
            std::mem::swap(x1, x2);
            std::mem::swap(z1, z2);
        });
    }

    /// Composes a Hadamard after the represented operation.
    pub fn append_h_xz(&mut self, q: usize) {
        self.for_each_column_obs(q, |x, z, s| {
            std::mem::swap(x, z);
            *s ^= *x & *z;
        });
    }

    /// Composes an X↔Y-exchanging Hadamard after the represented operation.
    pub fn append_h_xy(&mut self, q: usize) {
        self.for_each_column_obs(q, |x, z, s| {
            *s ^= !*x & *z;
            *z ^= *x;
        });
    }

    /// Composes a Y↔Z-exchanging Hadamard after the represented operation.
    pub fn append_h_yz(&mut self, q: usize) {
        self.for_each_column_obs(q, |x, z, s| {
            *s ^= !*z & *x;
            *x ^= *z;
        });
    }

    /// Composes an S gate after the represented operation.
    pub fn append_s(&mut self, q: usize) {
        self.for_each_column_obs(q, |x, z, s| {
            *s ^= *x & *z;
            *z ^= *x;
        });
    }

    /// Composes an X gate after the represented operation.
    pub fn append_x(&mut self, q: usize) {
        self.for_each_column_obs(q, |_x, z, s| {
            *s ^= *z;
        });
    }

    /// The unsigned Pauli whose image under the represented operation is
    /// X (or Y) on generator slot `q`: the witness of a non-deterministic
    /// measurement's kickback.
    pub fn unsigned_x_input(&self, q: usize) -> PauliString {
        let n = self.tableau.num_qubits();
        let mut result = PauliString::identity(n);
        result
            .xs
            .as_words_mut()
            .copy_from_slice(self.tableau.zs.zt.row(q));
        result
            .zs
            .as_words_mut()
            .copy_from_slice(self.tableau.xs.zt.row(q));
        result
    }
}

impl Drop for TransposedTableau<'_> {
    fn drop(&mut self) {
        self.tableau.do_transpose_quadrants();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_guard_restores_layout() {
        let mut rng = StdRng::seed_from_u64(0);
        let t0 = Tableau::random(9, &mut rng);
        let mut t = t0.clone();
        {
            let guard = TransposedTableau::new(&mut t);
            assert_eq!(guard.tableau().xs.xt.get(2, 7), t0.xs.xt.get(7, 2));
        }
        assert_eq!(t, t0);
    }

    #[test]
    fn test_transposed_append_matches_scatter_append() {
        let mut rng = StdRng::seed_from_u64(1);
        let h = Tableau::gate1("+Z", "+X").unwrap();
        let s_gate = Tableau::gate1("+Y", "+Z").unwrap();
        let h_yz = Tableau::gate1("-X", "+Y").unwrap();
        let h_xy = Tableau::gate1("+Y", "-Z").unwrap();
        let cx = Tableau::gate2("+XX", "+Z_", "+_X", "+ZZ").unwrap();
        let cy = Tableau::gate2("+XY", "+Z_", "+ZX", "+ZZ").unwrap();
        let cz = Tableau::gate2("+XZ", "+Z_", "+ZX", "+_Z").unwrap();
        let swap = Tableau::gate2("+_X", "+_Z", "+X_", "+Z_").unwrap();

        for n in [3usize, 66] {
            let t0 = Tableau::random(n, &mut rng);

            let check1 = |name: &str,
                          gate: &Tableau,
                          f: &dyn Fn(&mut TransposedTableau<'_>, usize)| {
                let mut expected = t0.clone();
                expected.inplace_scatter_append(gate, &[1]);
                let mut got = t0.clone();
                {
                    let mut guard = TransposedTableau::new(&mut got);
                    f(&mut guard, 1);
                }
                assert_eq!(got, expected, "{name} (n={n})");
            };
            check1("h_xz", &h, &|g, q| g.append_h_xz(q));
            check1("h_xy", &h_xy, &|g, q| g.append_h_xy(q));
            check1("h_yz", &h_yz, &|g, q| g.append_h_yz(q));
            check1("s", &s_gate, &|g, q| g.append_s(q));

            let check2 = |name: &str,
                          gate: &Tableau,
                          f: &dyn Fn(&mut TransposedTableau<'_>, usize, usize)| {
                let mut expected = t0.clone();
                expected.inplace_scatter_append(gate, &[0, 2]);
                let mut got = t0.clone();
                {
                    let mut guard = TransposedTableau::new(&mut got);
                    f(&mut guard, 0, 2);
                }
                assert_eq!(got, expected, "{name} (n={n})");
            };
            check2("zcx", &cx, &|g, a, b| g.append_zcx(a, b));
            check2("zcy", &cy, &|g, a, b| g.append_zcy(a, b));
            check2("zcz", &cz, &|g, a, b| g.append_zcz(a, b));
            check2("swap", &swap, &|g, a, b| g.append_swap(a, b));
        }
    }

    #[test]
    fn test_append_x_flips_sign_of_z_containing_images() {
        let mut t = Tableau::identity(2);
        {
            let mut guard = TransposedTableau::new(&mut t);
            guard.append_x(0);
        }
        assert_eq!(t.z_image(0).to_string(), "-Z_");
        assert_eq!(t.x_image(0).to_string(), "+X_");
        assert_eq!(t.z_image(1).to_string(), "+_Z");
    }
}
