//! `skuld-circuit` — stabilizer circuit representation and text format.
//!
//! Provides the gate registry (canonical names, aliases, behavior flags, and
//! the generator images of every Clifford gate), the bit-packed instruction
//! target encoding, and the [`Circuit`] container with its whitespace- and
//! comment-tolerant text format, fused appending, structural counts that
//! never unroll `REPEAT` blocks, and detector-coordinate queries.
//!
//! # Example
//!
//! ```rust
//! use skuld_circuit::Circuit;
//!
//! let circuit: Circuit = "
//!     H 0
//!     CX 0 1
//!     M 0 1
//!     DETECTOR rec[-1] rec[-2]
//! ".parse().unwrap();
//!
//! assert_eq!(circuit.count_qubits(), 2);
//! assert_eq!(circuit.count_measurements(), 2);
//! assert_eq!(circuit.to_string(), "H 0\nCX 0 1\nM 0 1\nDETECTOR rec[-1] rec[-2]");
//! ```

pub mod circuit;
pub mod error;
pub mod gate;
pub mod lexer;
pub mod parser;
pub mod target;

pub use circuit::{Circuit, CircuitStats, Instruction, Span};
pub use error::{CircuitError, CircuitResult};
pub use gate::{ArgCount, GATE_DATA, GateData, GateFlags, GateId};
pub use target::{
    GateTarget, TARGET_COMBINER_BIT, TARGET_INVERTED_BIT, TARGET_PAULI_X_BIT, TARGET_PAULI_Z_BIT,
    TARGET_RECORD_BIT, TARGET_SWEEP_BIT, TARGET_VALUE_MASK,
};
