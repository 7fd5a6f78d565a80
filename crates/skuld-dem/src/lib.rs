//! `skuld-dem` — detector error models.
//!
//! A detector error model describes a noisy stabilizer circuit's effect in
//! symptom space: probabilistic error mechanisms flipping detectors and
//! logical observables, plus detector declarations with coordinates, nested
//! `repeat` blocks, and running detector/coordinate shifts.
//!
//! # Example
//!
//! ```rust
//! use skuld_dem::DetectorErrorModel;
//!
//! let model: DetectorErrorModel = "
//!     error(0.125) D0 D1
//!     repeat 3 {
//!         error(0.25) D1 D2 ^ L0
//!         shift_detectors 1
//!     }
//! ".parse().unwrap();
//!
//! assert_eq!(model.count_observables(), 1);
//! assert_eq!(model.flattened().count_detectors(), model.count_detectors());
//! ```

pub mod error;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod target;

pub use error::{DemError, DemResult};
pub use model::{DemInstruction, DemInstructionType, DetectorErrorModel};
pub use target::DemTarget;
