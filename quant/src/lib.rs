pub mod bound;
pub mod calibration;
pub mod config;
pub mod error;
pub mod export;
pub mod modular;
pub mod network;
pub mod samples;

#[cfg(test)]
mod tests;

pub use bound::{Bound, Enforcement};
pub use calibration::{calibrate, Calibration, CalibrationResult, Probe, Tally};
pub use config::{CalibrationConfig, Int};
pub use error::{Error, Result};
pub use network::{EvalContext, Evaluation, Network, QuantizedNetwork, Topology, Variant};
pub use samples::{Sample, Samples};
