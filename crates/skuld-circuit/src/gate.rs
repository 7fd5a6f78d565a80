//! The static gate registry.
//!
//! A process-wide, immutable map from canonical gate names (and aliases) to
//! gate metadata: argument arity, behavior flags, the inverse gate for
//! unitaries, and the generator images that define each unitary's action.

use std::fmt;
use std::sync::LazyLock;

use rustc_hash::FxHashMap;
use skuld_stab::Tableau;

/// Identifies a gate. The discriminant indexes the registry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum GateId {
    // Single-qubit unitaries.
    I,
    X,
    Y,
    Z,
    H,
    HXY,
    HYZ,
    S,
    SDag,
    SqrtX,
    SqrtXDag,
    SqrtY,
    SqrtYDag,
    CXyz,
    CZyx,
    // Two-qubit unitaries.
    Cx,
    Cy,
    Cz,
    Xcx,
    Xcy,
    Xcz,
    Ycx,
    Ycy,
    Ycz,
    Swap,
    ISwap,
    ISwapDag,
    SqrtXx,
    SqrtXxDag,
    SqrtYy,
    SqrtYyDag,
    SqrtZz,
    SqrtZzDag,
    // Collapsing operations.
    M,
    Mx,
    My,
    Mr,
    Mrx,
    Mry,
    R,
    Rx,
    Ry,
    Mpp,
    // Noise channels.
    XError,
    YError,
    ZError,
    Depolarize1,
    Depolarize2,
    PauliChannel1,
    PauliChannel2,
    CorrelatedError,
    ElseCorrelatedError,
    // Annotations and control flow.
    Detector,
    ObservableInclude,
    Tick,
    QubitCoords,
    ShiftCoords,
    Repeat,
}

pub const NUM_GATES: usize = GateId::Repeat as usize + 1;

/// Bitset of gate behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateFlags(u32);

impl GateFlags {
    pub const NONE: GateFlags = GateFlags(0);
    /// The gate is a Clifford unitary.
    pub const UNITARY: GateFlags = GateFlags(1 << 0);
    /// The gate applies randomized Pauli noise.
    pub const NOISE: GateFlags = GateFlags(1 << 1);
    /// The gate forces qubits into a fixed state.
    pub const RESET: GateFlags = GateFlags(1 << 2);
    /// The gate appends bits to the measurement record.
    pub const PRODUCES_RESULTS: GateFlags = GateFlags(1 << 3);
    /// The produced results can be flipped by a probability argument.
    pub const PRODUCES_NOISY_RESULTS: GateFlags = GateFlags(1 << 4);
    /// Targets are consumed two at a time.
    pub const TARGETS_PAIRS: GateFlags = GateFlags(1 << 5);
    /// Targets form Pauli products.
    pub const TARGETS_PAULI_STRING: GateFlags = GateFlags(1 << 6);
    /// Pauli targets may be joined by `*` combiners.
    pub const TARGETS_COMBINERS: GateFlags = GateFlags(1 << 7);
    /// Measurement-record / sweep bits are allowed as (control) targets.
    pub const CAN_TARGET_BITS: GateFlags = GateFlags(1 << 8);
    /// Every target must be a measurement-record lookback.
    pub const ONLY_TARGETS_MEASUREMENT_RECORD: GateFlags = GateFlags(1 << 9);
    /// Arguments are disjoint probabilities in [0, 1].
    pub const ARGS_ARE_DISJOINT_PROBABILITIES: GateFlags = GateFlags(1 << 10);
    /// Arguments must be non-negative integers.
    pub const ARGS_ARE_UNSIGNED_INTS: GateFlags = GateFlags(1 << 11);
    /// Adjacent identical instructions must not be merged.
    pub const NOT_FUSABLE: GateFlags = GateFlags(1 << 12);
    /// The gate takes no targets at all.
    pub const TAKES_NO_TARGETS: GateFlags = GateFlags(1 << 13);
    /// The instruction introduces a nested block.
    pub const IS_BLOCK: GateFlags = GateFlags(1 << 14);

    #[inline]
    pub const fn union(self, other: GateFlags) -> GateFlags {
        GateFlags(self.0 | other.0)
    }

    #[inline]
    pub const fn contains(self, other: GateFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for GateFlags {
    type Output = GateFlags;
    fn bitor(self, rhs: GateFlags) -> GateFlags {
        self.union(rhs)
    }
}

/// How many parens arguments an instruction accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgCount {
    Exactly(usize),
    ZeroOrOne,
    Any,
}

impl fmt::Display for ArgCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgCount::Exactly(n) => write!(f, "{n}"),
            ArgCount::ZeroOrOne => write!(f, "0 or 1"),
            ArgCount::Any => write!(f, "any number of"),
        }
    }
}

/// Registry metadata for one gate.
pub struct GateData {
    pub id: GateId,
    /// Canonical name, as printed.
    pub name: &'static str,
    /// Accepted alternate names.
    pub aliases: &'static [&'static str],
    pub arg_count: ArgCount,
    pub flags: GateFlags,
    /// The gate undoing this one (unitaries only).
    pub inverse: Option<GateId>,
    /// Generator images defining a unitary: `[x0, z0]` for one qubit,
    /// `[x0, z0, x1, z1]` for two.
    pub flows: &'static [&'static str],
}

impl GateData {
    #[inline]
    pub fn is_unitary(&self) -> bool {
        self.flags.contains(GateFlags::UNITARY)
    }

    #[inline]
    pub fn is_noise(&self) -> bool {
        self.flags.contains(GateFlags::NOISE)
    }

    /// Number of qubits a unitary acts on (1 or 2).
    pub fn num_unitary_qubits(&self) -> usize {
        debug_assert!(self.is_unitary());
        self.flows.len() / 2
    }

    /// Builds the small tableau realizing a unitary gate.
    pub fn tableau(&self) -> Tableau {
        assert!(self.is_unitary(), "{} has no unitary action", self.name);
        match self.flows {
            [x0, z0] => Tableau::gate1(x0, z0).expect("registry flow strings are valid"),
            [x0, z0, x1, z1] => {
                Tableau::gate2(x0, z0, x1, z1).expect("registry flow strings are valid")
            }
            _ => unreachable!("unitary flow table must have 2 or 4 entries"),
        }
    }

    /// Whether two adjacent instructions with this gate and equal arguments
    /// may be merged by concatenating their targets.
    pub fn is_fusable(&self) -> bool {
        !self.flags.contains(GateFlags::NOT_FUSABLE)
    }
}

impl GateId {
    /// Looks up the registry entry.
    #[inline]
    pub fn data(self) -> &'static GateData {
        &GATE_DATA.items[self as usize]
    }

    /// Canonical name.
    #[inline]
    pub fn name(self) -> &'static str {
        self.data().name
    }

    /// Resolves a (case-insensitive) name or alias.
    pub fn from_name(name: &str) -> Option<GateId> {
        GATE_DATA
            .name_map
            .get(name.to_ascii_uppercase().as_str())
            .copied()
    }
}

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The process-wide registry. Initialized once; a name collision between two
/// entries is a fatal construction error.
pub struct GateRegistry {
    items: Vec<GateData>,
    name_map: FxHashMap<&'static str, GateId>,
}

impl GateRegistry {
    /// Iterates every entry in id order.
    pub fn all(&self) -> impl Iterator<Item = &GateData> {
        self.items.iter()
    }
}

pub static GATE_DATA: LazyLock<GateRegistry> = LazyLock::new(build_registry);

fn build_registry() -> GateRegistry {
    use GateId::*;
    let u = GateFlags::UNITARY;
    let u2 = GateFlags::UNITARY | GateFlags::TARGETS_PAIRS;
    let noise = GateFlags::NOISE | GateFlags::ARGS_ARE_DISJOINT_PROBABILITIES;
    let measure = GateFlags::PRODUCES_RESULTS
        | GateFlags::PRODUCES_NOISY_RESULTS
        | GateFlags::ARGS_ARE_DISJOINT_PROBABILITIES;
    let annotation = GateFlags::NOT_FUSABLE;

    let mut items: Vec<GateData> = vec![];
    let mut add = |gate: GateData| items.push(gate);

    // ===================== Single-qubit unitaries. =====================
    add(gate(I, "I", &[], ArgCount::Exactly(0), u, Some(I), &["+X", "+Z"]));
    add(gate(X, "X", &[], ArgCount::Exactly(0), u, Some(X), &["+X", "-Z"]));
    add(gate(Y, "Y", &[], ArgCount::Exactly(0), u, Some(Y), &["-X", "-Z"]));
    add(gate(Z, "Z", &[], ArgCount::Exactly(0), u, Some(Z), &["-X", "+Z"]));
    add(gate(H, "H", &["H_XZ"], ArgCount::Exactly(0), u, Some(H), &["+Z", "+X"]));
    add(gate(HXY, "H_XY", &[], ArgCount::Exactly(0), u, Some(HXY), &["+Y", "-Z"]));
    add(gate(HYZ, "H_YZ", &[], ArgCount::Exactly(0), u, Some(HYZ), &["-X", "+Y"]));
    add(gate(S, "S", &["SQRT_Z"], ArgCount::Exactly(0), u, Some(SDag), &["+Y", "+Z"]));
    add(gate(SDag, "S_DAG", &["SQRT_Z_DAG"], ArgCount::Exactly(0), u, Some(S), &["-Y", "+Z"]));
    add(gate(SqrtX, "SQRT_X", &[], ArgCount::Exactly(0), u, Some(SqrtXDag), &["+X", "-Y"]));
    add(gate(SqrtXDag, "SQRT_X_DAG", &[], ArgCount::Exactly(0), u, Some(SqrtX), &["+X", "+Y"]));
    add(gate(SqrtY, "SQRT_Y", &[], ArgCount::Exactly(0), u, Some(SqrtYDag), &["-Z", "+X"]));
    add(gate(SqrtYDag, "SQRT_Y_DAG", &[], ArgCount::Exactly(0), u, Some(SqrtY), &["+Z", "-X"]));
    add(gate(CXyz, "C_XYZ", &[], ArgCount::Exactly(0), u, Some(CZyx), &["+Y", "+X"]));
    add(gate(CZyx, "C_ZYX", &[], ArgCount::Exactly(0), u, Some(CXyz), &["+Z", "+Y"]));

    // ===================== Two-qubit unitaries. =====================
    let bits2 = u2 | GateFlags::CAN_TARGET_BITS;
    add(gate(Cx, "CX", &["ZCX", "CNOT"], ArgCount::Exactly(0), bits2, Some(Cx),
        &["+XX", "+Z_", "+_X", "+ZZ"]));
    add(gate(Cy, "CY", &["ZCY"], ArgCount::Exactly(0), bits2, Some(Cy),
        &["+XY", "+Z_", "+ZX", "+ZZ"]));
    add(gate(Cz, "CZ", &["ZCZ"], ArgCount::Exactly(0), bits2, Some(Cz),
        &["+XZ", "+Z_", "+ZX", "+_Z"]));
    add(gate(Xcx, "XCX", &[], ArgCount::Exactly(0), u2, Some(Xcx),
        &["+X_", "+ZX", "+_X", "+XZ"]));
    add(gate(Xcy, "XCY", &[], ArgCount::Exactly(0), u2, Some(Xcy),
        &["+X_", "+ZY", "+XX", "+XZ"]));
    add(gate(Xcz, "XCZ", &[], ArgCount::Exactly(0), u2 | GateFlags::CAN_TARGET_BITS, Some(Xcz),
        &["+X_", "+ZZ", "+XX", "+_Z"]));
    add(gate(Ycx, "YCX", &[], ArgCount::Exactly(0), u2, Some(Ycx),
        &["+XX", "+ZX", "+_X", "+YZ"]));
    add(gate(Ycy, "YCY", &[], ArgCount::Exactly(0), u2, Some(Ycy),
        &["+XY", "+ZY", "+YX", "+YZ"]));
    add(gate(Ycz, "YCZ", &[], ArgCount::Exactly(0), u2 | GateFlags::CAN_TARGET_BITS, Some(Ycz),
        &["+XZ", "+ZZ", "+YX", "+_Z"]));
    add(gate(Swap, "SWAP", &[], ArgCount::Exactly(0), u2, Some(Swap),
        &["+_X", "+_Z", "+X_", "+Z_"]));
    add(gate(ISwap, "ISWAP", &[], ArgCount::Exactly(0), u2, Some(ISwapDag),
        &["+ZY", "+_Z", "+YZ", "+Z_"]));
    add(gate(ISwapDag, "ISWAP_DAG", &[], ArgCount::Exactly(0), u2, Some(ISwap),
        &["-ZY", "+_Z", "-YZ", "+Z_"]));
    add(gate(SqrtXx, "SQRT_XX", &[], ArgCount::Exactly(0), u2, Some(SqrtXxDag),
        &["+X_", "-YX", "+_X", "-XY"]));
    add(gate(SqrtXxDag, "SQRT_XX_DAG", &[], ArgCount::Exactly(0), u2, Some(SqrtXx),
        &["+X_", "+YX", "+_X", "+XY"]));
    add(gate(SqrtYy, "SQRT_YY", &[], ArgCount::Exactly(0), u2, Some(SqrtYyDag),
        &["-ZY", "+XY", "-YZ", "+YX"]));
    add(gate(SqrtYyDag, "SQRT_YY_DAG", &[], ArgCount::Exactly(0), u2, Some(SqrtYy),
        &["+ZY", "-XY", "+YZ", "-YX"]));
    add(gate(SqrtZz, "SQRT_ZZ", &[], ArgCount::Exactly(0), u2, Some(SqrtZzDag),
        &["+YZ", "+Z_", "+ZY", "+_Z"]));
    add(gate(SqrtZzDag, "SQRT_ZZ_DAG", &[], ArgCount::Exactly(0), u2, Some(SqrtZz),
        &["-YZ", "+Z_", "-ZY", "+_Z"]));

    // ===================== Collapsing operations. =====================
    add(gate(M, "M", &["MZ"], ArgCount::ZeroOrOne, measure, None, &[]));
    add(gate(Mx, "MX", &[], ArgCount::ZeroOrOne, measure, None, &[]));
    add(gate(My, "MY", &[], ArgCount::ZeroOrOne, measure, None, &[]));
    add(gate(Mr, "MR", &["MRZ"], ArgCount::ZeroOrOne, measure | GateFlags::RESET, None, &[]));
    add(gate(Mrx, "MRX", &[], ArgCount::ZeroOrOne, measure | GateFlags::RESET, None, &[]));
    add(gate(Mry, "MRY", &[], ArgCount::ZeroOrOne, measure | GateFlags::RESET, None, &[]));
    add(gate(R, "R", &["RZ"], ArgCount::Exactly(0), GateFlags::RESET, None, &[]));
    add(gate(Rx, "RX", &[], ArgCount::Exactly(0), GateFlags::RESET, None, &[]));
    add(gate(Ry, "RY", &[], ArgCount::Exactly(0), GateFlags::RESET, None, &[]));
    add(gate(
        Mpp,
        "MPP",
        &[],
        ArgCount::ZeroOrOne,
        measure | GateFlags::TARGETS_PAULI_STRING | GateFlags::TARGETS_COMBINERS,
        None,
        &[],
    ));

    // ===================== Noise channels. =====================
    add(gate(XError, "X_ERROR", &[], ArgCount::Exactly(1), noise, None, &[]));
    add(gate(YError, "Y_ERROR", &[], ArgCount::Exactly(1), noise, None, &[]));
    add(gate(ZError, "Z_ERROR", &[], ArgCount::Exactly(1), noise, None, &[]));
    add(gate(Depolarize1, "DEPOLARIZE1", &[], ArgCount::Exactly(1), noise, None, &[]));
    add(gate(
        Depolarize2,
        "DEPOLARIZE2",
        &[],
        ArgCount::Exactly(1),
        noise | GateFlags::TARGETS_PAIRS,
        None,
        &[],
    ));
    add(gate(PauliChannel1, "PAULI_CHANNEL_1", &[], ArgCount::Exactly(3), noise, None, &[]));
    add(gate(
        PauliChannel2,
        "PAULI_CHANNEL_2",
        &[],
        ArgCount::Exactly(15),
        noise | GateFlags::TARGETS_PAIRS,
        None,
        &[],
    ));
    add(gate(
        CorrelatedError,
        "E",
        &["CORRELATED_ERROR"],
        ArgCount::Exactly(1),
        noise | GateFlags::TARGETS_PAULI_STRING | GateFlags::NOT_FUSABLE,
        None,
        &[],
    ));
    add(gate(
        ElseCorrelatedError,
        "ELSE_CORRELATED_ERROR",
        &[],
        ArgCount::Exactly(1),
        noise | GateFlags::TARGETS_PAULI_STRING | GateFlags::NOT_FUSABLE,
        None,
        &[],
    ));

    // ===================== Annotations and control flow. =====================
    add(gate(
        Detector,
        "DETECTOR",
        &[],
        ArgCount::Any,
        annotation | GateFlags::ONLY_TARGETS_MEASUREMENT_RECORD,
        None,
        &[],
    ));
    add(gate(
        ObservableInclude,
        "OBSERVABLE_INCLUDE",
        &[],
        ArgCount::Exactly(1),
        annotation | GateFlags::ONLY_TARGETS_MEASUREMENT_RECORD | GateFlags::ARGS_ARE_UNSIGNED_INTS,
        None,
        &[],
    ));
    add(gate(
        Tick,
        "TICK",
        &[],
        ArgCount::Exactly(0),
        annotation | GateFlags::TAKES_NO_TARGETS,
        None,
        &[],
    ));
    add(gate(QubitCoords, "QUBIT_COORDS", &[], ArgCount::Any, annotation, None, &[]));
    add(gate(
        ShiftCoords,
        "SHIFT_COORDS",
        &[],
        ArgCount::Any,
        annotation | GateFlags::TAKES_NO_TARGETS,
        None,
        &[],
    ));
    add(gate(
        Repeat,
        "REPEAT",
        &[],
        ArgCount::Exactly(0),
        annotation | GateFlags::IS_BLOCK,
        None,
        &[],
    ));

    // Table order must match the enum discriminants, and every gate must be
    // defined exactly once.
    assert_eq!(items.len(), NUM_GATES);
    for (k, item) in items.iter().enumerate() {
        assert_eq!(item.id as usize, k, "registry entry {} out of order", item.name);
    }

    let mut name_map: FxHashMap<&'static str, GateId> = FxHashMap::default();
    for item in &items {
        if name_map.insert(item.name, item.id).is_some() {
            panic!("gate name collision: {}", item.name);
        }
        for &alias in item.aliases {
            if name_map.insert(alias, item.id).is_some() {
                panic!("gate name collision: {alias}");
            }
        }
    }

    GateRegistry { items, name_map }
}

#[allow(clippy::too_many_arguments)]
fn gate(
    id: GateId,
    name: &'static str,
    aliases: &'static [&'static str],
    arg_count: ArgCount,
    flags: GateFlags,
    inverse: Option<GateId>,
    flows: &'static [&'static str],
) -> GateData {
    GateData {
        id,
        name,
        aliases,
        arg_count,
        flags,
        inverse,
        flows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skuld_stab::Tableau;

    #[test]
    fn test_lookup_canonical_and_aliases() {
        assert_eq!(GateId::from_name("H"), Some(GateId::H));
        assert_eq!(GateId::from_name("h_xz"), Some(GateId::H));
        assert_eq!(GateId::from_name("cnot"), Some(GateId::Cx));
        assert_eq!(GateId::from_name("ZCX"), Some(GateId::Cx));
        assert_eq!(GateId::from_name("MZ"), Some(GateId::M));
        assert_eq!(GateId::from_name("CORRELATED_ERROR"), Some(GateId::CorrelatedError));
        assert_eq!(GateId::from_name("NOT_A_GATE"), None);
    }

    #[test]
    fn test_every_unitary_flow_is_a_valid_clifford() {
        for item in &GATE_DATA.items {
            if item.is_unitary() {
                let t = item.tableau();
                assert!(t.satisfies_invariants(), "{}", item.name);
                assert_eq!(t.num_qubits(), item.num_unitary_qubits(), "{}", item.name);
            }
        }
    }

    #[test]
    fn test_inverse_pairs_cancel() {
        for item in &GATE_DATA.items {
            if !item.is_unitary() {
                assert!(item.inverse.is_none(), "{}", item.name);
                continue;
            }
            let inv_id = item.inverse.unwrap();
            let inv = inv_id.data();
            assert_eq!(inv.inverse, Some(item.id), "{}", item.name);
            let n = item.num_unitary_qubits();
            assert_eq!(
                item.tableau().then(&inv.tableau()),
                Tableau::identity(n),
                "{} then {}",
                item.name,
                inv.name
            );
        }
    }

    #[test]
    fn test_flags() {
        assert!(GateId::M.data().flags.contains(GateFlags::PRODUCES_RESULTS));
        assert!(GateId::Mr.data().flags.contains(GateFlags::RESET));
        assert!(!GateId::M.data().flags.contains(GateFlags::RESET));
        assert!(GateId::XError.data().is_noise());
        assert!(!GateId::Tick.data().is_fusable());
        assert!(GateId::H.data().is_fusable());
        assert!(GateId::Repeat.data().flags.contains(GateFlags::IS_BLOCK));
        assert!(GateId::Cx.data().flags.contains(GateFlags::CAN_TARGET_BITS));
        assert!(!GateId::Xcx.data().flags.contains(GateFlags::CAN_TARGET_BITS));
    }
}
