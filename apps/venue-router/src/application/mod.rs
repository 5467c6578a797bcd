//! Application Layer
//!
//! Ports the core depends on and the services that orchestrate routing.

pub mod ports;
pub mod services;
