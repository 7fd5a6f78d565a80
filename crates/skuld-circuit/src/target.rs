//! Bit-packed instruction targets.

use std::fmt;

use skuld_stab::Pauli;

/// Value bits: the qubit index / lookback distance / sweep index.
pub const TARGET_VALUE_MASK: u32 = (1 << 24) - 1;
/// The reported result of this target is flipped.
pub const TARGET_INVERTED_BIT: u32 = 1 << 31;
/// The target is (part of) a Pauli with an X component.
pub const TARGET_PAULI_X_BIT: u32 = 1 << 30;
/// The target is (part of) a Pauli with a Z component.
pub const TARGET_PAULI_Z_BIT: u32 = 1 << 29;
/// The target is a measurement-record lookback `rec[-k]`.
pub const TARGET_RECORD_BIT: u32 = 1 << 28;
/// The target is a sweep-bit reference `sweep[k]`.
pub const TARGET_SWEEP_BIT: u32 = 1 << 27;
/// The target is the `*` combiner joining Pauli targets.
pub const TARGET_COMBINER_BIT: u32 = 1 << 26;

/// One instruction target packed into 32 bits: a value in the low 24 bits
/// plus role flags. Exactly one of {plain qubit, Pauli target, record
/// lookback, sweep bit, combiner} describes the role.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GateTarget {
    pub data: u32,
}

impl GateTarget {
    /// A plain qubit target.
    pub fn qubit(q: u32) -> Self {
        debug_assert!(q <= TARGET_VALUE_MASK);
        Self { data: q }
    }

    /// A qubit target whose reported measurement result is flipped.
    pub fn inverted_qubit(q: u32) -> Self {
        Self {
            data: q | TARGET_INVERTED_BIT,
        }
    }

    /// A Pauli-X target on qubit `q`.
    pub fn x(q: u32) -> Self {
        Self {
            data: q | TARGET_PAULI_X_BIT,
        }
    }

    /// A Pauli-Y target on qubit `q`.
    pub fn y(q: u32) -> Self {
        Self {
            data: q | TARGET_PAULI_X_BIT | TARGET_PAULI_Z_BIT,
        }
    }

    /// A Pauli-Z target on qubit `q`.
    pub fn z(q: u32) -> Self {
        Self {
            data: q | TARGET_PAULI_Z_BIT,
        }
    }

    /// A Pauli target from an explicit Pauli.
    pub fn pauli(q: u32, p: Pauli, inverted: bool) -> Self {
        let mut data = q;
        let (x, z) = p.to_xz();
        if x {
            data |= TARGET_PAULI_X_BIT;
        }
        if z {
            data |= TARGET_PAULI_Z_BIT;
        }
        if inverted {
            data |= TARGET_INVERTED_BIT;
        }
        Self { data }
    }

    /// A measurement-record lookback `rec[-lookback]`, `lookback ≥ 1`.
    pub fn rec(lookback: u32) -> Self {
        debug_assert!(lookback >= 1 && lookback <= TARGET_VALUE_MASK);
        Self {
            data: lookback | TARGET_RECORD_BIT,
        }
    }

    /// A sweep-bit reference `sweep[k]`.
    pub fn sweep(k: u32) -> Self {
        debug_assert!(k <= TARGET_VALUE_MASK);
        Self {
            data: k | TARGET_SWEEP_BIT,
        }
    }

    /// The `*` combiner.
    pub fn combiner() -> Self {
        Self {
            data: TARGET_COMBINER_BIT,
        }
    }

    /// The value bits (qubit index, lookback distance, or sweep index).
    #[inline]
    pub fn value(self) -> u32 {
        self.data & TARGET_VALUE_MASK
    }

    #[inline]
    pub fn is_inverted(self) -> bool {
        self.data & TARGET_INVERTED_BIT != 0
    }

    #[inline]
    pub fn is_record(self) -> bool {
        self.data & TARGET_RECORD_BIT != 0
    }

    #[inline]
    pub fn is_sweep(self) -> bool {
        self.data & TARGET_SWEEP_BIT != 0
    }

    #[inline]
    pub fn is_combiner(self) -> bool {
        self.data & TARGET_COMBINER_BIT != 0
    }

    #[inline]
    pub fn is_pauli(self) -> bool {
        self.data & (TARGET_PAULI_X_BIT | TARGET_PAULI_Z_BIT) != 0
    }

    /// Whether this names a qubit (plain or Pauli), as opposed to a classical
    /// bit or combiner.
    #[inline]
    pub fn has_qubit_value(self) -> bool {
        self.data & (TARGET_RECORD_BIT | TARGET_SWEEP_BIT | TARGET_COMBINER_BIT) == 0
    }

    /// Whether this is a classical-bit target (record or sweep).
    #[inline]
    pub fn is_classical_bit(self) -> bool {
        self.data & (TARGET_RECORD_BIT | TARGET_SWEEP_BIT) != 0
    }

    /// The Pauli component of a Pauli target.
    pub fn pauli_component(self) -> Pauli {
        Pauli::from_xz(
            self.data & TARGET_PAULI_X_BIT != 0,
            self.data & TARGET_PAULI_Z_BIT != 0,
        )
    }
}

impl fmt::Display for GateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_combiner() {
            return write!(f, "*");
        }
        if self.is_record() {
            return write!(f, "rec[-{}]", self.value());
        }
        if self.is_sweep() {
            return write!(f, "sweep[{}]", self.value());
        }
        if self.is_inverted() {
            write!(f, "!")?;
        }
        if self.is_pauli() {
            match self.pauli_component() {
                Pauli::X => write!(f, "X")?,
                Pauli::Y => write!(f, "Y")?,
                Pauli::Z => write!(f, "Z")?,
                Pauli::I => {}
            }
        }
        write!(f, "{}", self.value())
    }
}

impl fmt::Debug for GateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_are_exclusive() {
        assert!(GateTarget::qubit(5).has_qubit_value());
        assert!(!GateTarget::qubit(5).is_pauli());
        assert!(GateTarget::x(5).has_qubit_value());
        assert!(GateTarget::x(5).is_pauli());
        assert!(GateTarget::rec(3).is_record());
        assert!(!GateTarget::rec(3).has_qubit_value());
        assert!(GateTarget::sweep(0).is_sweep());
        assert!(GateTarget::combiner().is_combiner());
    }

    #[test]
    fn test_values() {
        assert_eq!(GateTarget::qubit(77).value(), 77);
        assert_eq!(GateTarget::rec(4).value(), 4);
        assert_eq!(GateTarget::inverted_qubit(9).value(), 9);
        assert!(GateTarget::inverted_qubit(9).is_inverted());
        assert_eq!(GateTarget::y(2).pauli_component(), Pauli::Y);
    }

    #[test]
    fn test_display() {
        assert_eq!(GateTarget::qubit(5).to_string(), "5");
        assert_eq!(GateTarget::inverted_qubit(5).to_string(), "!5");
        assert_eq!(GateTarget::x(5).to_string(), "X5");
        assert_eq!(GateTarget::pauli(1, Pauli::Y, true).to_string(), "!Y1");
        assert_eq!(GateTarget::rec(3).to_string(), "rec[-3]");
        assert_eq!(GateTarget::sweep(2).to_string(), "sweep[2]");
        assert_eq!(GateTarget::combiner().to_string(), "*");
    }
}
