//! Error types for detector error models.

use thiserror::Error;

/// Errors that can occur while building or parsing detector error models.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DemError {
    /// The lexer hit a character sequence that is not a valid token.
    #[error("invalid token {snippet:?} at line {line}")]
    InvalidToken { snippet: String, line: usize },

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

    /// An instruction name outside the error-model vocabulary.
    #[error("unknown error-model instruction {name:?} at line {line}")]
    UnknownInstruction { name: String, line: usize },

    /// An `error` instruction probability outside [0, 1].
    #[error("error probability {0} is not in [0, 1]")]
    InvalidProbability(f64),

    /// An instruction got the wrong number of arguments or targets.
    #[error("{instruction} instruction: {problem}")]
    MalformedInstruction {
        instruction: &'static str,
        problem: String,
    },

    /// A separator at the start/end of an error, or two in a row.
    #[error("separator '^' must sit between error targets")]
    DanglingSeparator,

    /// A repeat block with a zero repetition count.
    #[error("repeat blocks must repeat at least once")]
    ZeroRepeatCount,

    /// A detector index past the end of the model's detectors.
    #[error("detector index {index} is out of range (model has {available} detectors)")]
    DetectorIndexTooLarge { index: u64, available: u64 },
}

/// Result type for detector-error-model operations.
pub type DemResult<T> = Result<T, DemError>;
