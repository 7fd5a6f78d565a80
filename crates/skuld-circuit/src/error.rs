//! Error types for circuit construction and parsing.

use thiserror::Error;

/// Errors that can occur while building or parsing circuits.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CircuitError {
    /// The lexer hit a character sequence that is not a valid token.
    #[error("invalid token {snippet:?} at line {line}")]
    InvalidToken {
        /// The offending text.
        snippet: String,
        /// 1-based source line.
        line: usize,
    },

    /// A construct other than the expected one was found.
    #[error("expected {expected} but found {found} at line {line}")]
    UnexpectedToken {
        line: usize,
        expected: String,
        found: String,
    },

    /// Input ended in the middle of a construct.
    #[error("unexpected end of input: {0}")]
    UnexpectedEof(String),

    /// An instruction name that is not in the gate registry.
    #[error("unknown gate name {name:?} at line {line}")]
    UnknownGate { name: String, line: usize },

    /// An instruction got the wrong number of parens arguments.
    #[error("gate {gate} expects {expected} parens argument(s), got {got}")]
    WrongArgumentCount {
        gate: &'static str,
        expected: String,
        got: usize,
    },

    /// A probability argument was outside [0, 1].
    #[error("gate {gate} argument {value} is not a probability in [0, 1]")]
    InvalidProbability { gate: &'static str, value: f64 },

    /// Disjoint probability arguments summed to more than 1.
    #[error("gate {gate} probability arguments sum to {sum}, which exceeds 1")]
    ProbabilitiesExceedUnity { gate: &'static str, sum: f64 },

    /// An argument that must be a non-negative integer was not.
    #[error("gate {gate} argument {value} is not a non-negative integer")]
    ExpectedUnsignedInteger { gate: &'static str, value: f64 },

    /// A target kind the gate cannot consume.
    #[error("gate {gate} cannot be applied to target {target}")]
    InvalidTargetKind { gate: &'static str, target: String },

    /// A two-qubit gate got an odd number of targets.
    #[error("gate {gate} requires an even number of targets, got {got}")]
    ExpectedPairedTargets { gate: &'static str, got: usize },

    /// A two-qubit pair used the same qubit twice.
    #[error("gate {gate} was given a pair with duplicate qubit {qubit}")]
    DuplicateQubitInPair { gate: &'static str, qubit: u32 },

    /// A combiner appeared without Pauli targets on both sides.
    #[error("gate {gate} has a dangling combiner (`*` must join Pauli targets)")]
    DanglingCombiner { gate: &'static str },

    /// A qubit index at or above the 2^24 addressing limit.
    #[error("qubit index {qubit} is too large (limit is 2^24 - 1)")]
    QubitTooLarge { qubit: u64 },

    /// A measurement-record lookback reaching before the start of the record.
    #[error("rec[-{lookback}] reaches before the beginning of the measurement record ({available} result(s) available)")]
    LookbackOutOfRange { lookback: u64, available: u64 },

    /// A repeat block with a zero repetition count.
    #[error("REPEAT blocks must repeat at least once")]
    ZeroRepeatCount,

    /// A repeat block with no instructions.
    #[error("REPEAT blocks must contain at least one instruction")]
    EmptyRepeatBlock,

    /// A gate that takes no targets was given targets.
    #[error("gate {gate} takes no targets")]
    TakesNoTargets { gate: &'static str },

    /// A detector index past the end of the circuit's detectors.
    #[error("detector index {index} is out of range (circuit has {available} detectors)")]
    DetectorIndexTooLarge { index: u64, available: u64 },
}

/// Result type for circuit operations.
pub type CircuitResult<T> = Result<T, CircuitError>;
