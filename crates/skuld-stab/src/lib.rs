//! `skuld-stab` — Pauli strings and Clifford tableaus.
//!
//! The pure stabilizer algebra layer of skuld: signed Pauli operator strings
//! with phase-tracked products, and tableau representations of Clifford
//! unitaries with in-place gate composition in both temporal directions,
//! composition, inversion, and uniform random sampling.
//!
//! # Example
//!
//! ```rust
//! use skuld_stab::{PauliString, Tableau};
//!
//! // Build a CX tableau from its generator images and check it maps
//! // Z⊗Z to Z⊗I.
//! let cx = Tableau::gate2("+XX", "+Z_", "+_X", "+ZZ").unwrap();
//! let zz: PauliString = "+ZZ".parse().unwrap();
//! assert_eq!(cx.eval(&zz).to_string(), "+Z_");
//!
//! // Composition with the inverse is the identity.
//! let inv = cx.inverse().unwrap();
//! assert_eq!(cx.then(&inv), Tableau::identity(2));
//! ```

pub mod error;
pub mod pauli;
pub mod tableau;
pub mod transposed;

pub use error::{StabError, StabResult};
pub use pauli::{Pauli, PauliString, commutes_words, mul_words_with_phase};
pub use tableau::{Half, Tableau, TableauHalf};
pub use transposed::TransposedTableau;
