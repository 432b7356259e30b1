//! Price source implementations

pub mod simulated;

pub use simulated::{SimulatedMetalSource, SimulatedSourceConfig};
