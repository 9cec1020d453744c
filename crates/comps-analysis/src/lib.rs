//! Analysis computations over SEC + market inputs.
//!
//! All functions here are pure over their inputs: data-quality problems
//! become warnings on the produced values, never errors.

pub mod enterprise_value;
pub mod growth;
pub mod multiples;
pub mod operating;
pub mod utils;

pub use enterprise_value::build_ev_bridge;
pub use growth::compute_growth;
pub use multiples::compute_multiples;
pub use operating::compute_operating;
