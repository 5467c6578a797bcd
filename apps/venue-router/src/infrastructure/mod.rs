//! Infrastructure Layer
//!
//! Adapters for provider streams, order placement, configuration and
//! telemetry.

pub mod broker;
pub mod config;
pub mod stream;
pub mod telemetry;
