//! Provider Adapters

pub mod simulated;

pub use simulated::{SimulatedBehavior, SimulatedProviderAdapter};
