//! `skuld-search` — shortest undetectable logical error search.
//!
//! Given a detector error model, finds a smallest set of error mechanisms
//! whose symptoms cancel while their combined observable effect does not —
//! the code-distance witness of the modeled circuit.
//!
//! Two searches are provided: a fast graphlike core restricted to ≤2-symptom
//! mechanisms ([`shortest_graphlike_undetectable_logical_error`]) and a
//! bounded-support breadth-first generalization over hyperedges
//! ([`shortest_undetectable_logical_error`]).
//!
//! # Example
//!
//! ```rust
//! use skuld_dem::DetectorErrorModel;
//! use skuld_search::shortest_graphlike_undetectable_logical_error;
//!
//! let model: DetectorErrorModel = "
//!     error(0.01) D0 L0
//!     error(0.01) D0 D1
//!     error(0.01) D1
//! ".parse().unwrap();
//! let witness = shortest_graphlike_undetectable_logical_error(&model, false).unwrap();
//! assert_eq!(witness.count_errors(), 3);
//! ```

pub mod error;
pub mod graphlike;
pub mod hyper;

pub use error::{SearchError, SearchResult};
pub use graphlike::{AdjEdge, AdjGraph, AdjNode, shortest_graphlike_undetectable_logical_error};
pub use hyper::shortest_undetectable_logical_error;
