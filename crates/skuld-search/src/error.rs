//! Error types for the logical-error search.

use thiserror::Error;

/// Errors that can occur while searching a detector error model.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SearchError {
    /// The graphlike search hit an error mechanism with more than two
    /// symptoms.
    #[error(
        "the detector error model contains a non-graphlike error mechanism \
         ({symptoms} symptoms); pass ignore_ungraphlike_errors or use the \
         hyperedge search"
    )]
    UngraphlikeError {
        /// Symptom count of the offending mechanism.
        symptoms: usize,
    },

    /// More observables than fit in the search's 64-bit masks.
    #[error("searching models with more than 64 observables is not supported (got {0})")]
    TooManyObservables(u64),

    /// Exhausted the search space without finding a logical error.
    #[error("no undetectable logical error was found")]
    NoUndetectableLogicalError,
}

/// Result type for search operations.
pub type SearchResult<T> = Result<T, SearchError>;
