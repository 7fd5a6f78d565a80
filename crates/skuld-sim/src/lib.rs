//! `skuld-sim` — the tableau simulator.
//!
//! Executes stabilizer circuits: Clifford gates via inverse-tableau updates,
//! measurements with the collapse protocol, resets, Pauli product
//! measurements, noise channels driven by rare-event sampling, and classical
//! feedback from the measurement record. Results stream through pluggable
//! [`RecordWriter`] formats.
//!
//! # Example
//!
//! ```rust
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//! use skuld_circuit::Circuit;
//! use skuld_sim::TableauSimulator;
//!
//! let circuit: Circuit = "H 0\nCNOT 0 1\nM 0 1".parse().unwrap();
//! let record = TableauSimulator::sample_circuit(
//!     &circuit,
//!     StdRng::seed_from_u64(5),
//!     0,
//! ).unwrap();
//! // The Bell state's measurements always agree.
//! assert_eq!(record[0], record[1]);
//! ```

pub mod convert;
pub mod error;
pub mod record;
pub mod simulator;
pub mod writer;

pub use convert::circuit_to_tableau;
pub use error::{SimError, SimResult};
pub use record::MeasureRecord;
pub use simulator::{TableauSimulator, reference_sample_circuit};
pub use writer::{
    Format01Writer, FormatB8Writer, FormatDetsWriter, FormatHitsWriter, FormatR8Writer,
    RecordWriter, SampleFormat, writer_for_format,
};
