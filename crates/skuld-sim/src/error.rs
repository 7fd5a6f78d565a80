//! Error types for simulation.

use thiserror::Error;

/// Errors that can occur while simulating.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SimError {
    /// A classical control tried to write into the measurement record.
    #[error("measurement record editing is not supported (target {target})")]
    RecordEditing {
        /// Text form of the offending target.
        target: String,
    },

    /// A record lookback reached past the beginning of the log.
    #[error("rec[-{lookback}] reaches before the beginning of the measurement record ({available} result(s) recorded)")]
    LookbackOutOfRange { lookback: u64, available: u64 },

    /// A circuit with a non-unitary operation was converted to a tableau.
    #[error("gate {gate} is not unitary, so the circuit does not describe a single Clifford operation")]
    NotUnitary { gate: &'static str },

    /// An instruction the simulator cannot execute as given.
    #[error("{gate}: {problem}")]
    BadInstruction {
        gate: &'static str,
        problem: String,
    },

    /// A circuit-layer failure (streaming parse, validation).
    #[error(transparent)]
    Circuit(#[from] skuld_circuit::CircuitError),

    /// A failure in the record writer's output stream.
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for simulation operations.
pub type SimResult<T> = Result<T, SimError>;
