//! Error types for the stabilizer algebra crate.

use thiserror::Error;

/// Errors that can occur in Pauli/tableau operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StabError {
    /// A Pauli string contained a character outside `+-_IXYZ`.
    #[error("invalid character {character:?} at position {position} in Pauli string {text:?}")]
    InvalidPauliCharacter {
        /// The offending character.
        character: char,
        /// Byte position within the text.
        position: usize,
        /// The full text being parsed.
        text: String,
    },

    /// A Pauli string had the wrong number of qubits for the operation.
    #[error("Pauli string has {got} qubits, expected {expected}")]
    LengthMismatch {
        /// Required number of qubits.
        expected: usize,
        /// Number of qubits provided.
        got: usize,
    },

    /// A tableau no longer preserves the generator commutation table.
    #[error("tableau does not satisfy the stabilizer commutation invariants")]
    BrokenInvariants,
}

/// Result type for stabilizer algebra operations.
pub type StabResult<T> = Result<T, StabError>;
