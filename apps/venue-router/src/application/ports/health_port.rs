//! Health Port
//!
//! Receives provider health observations, such as ping round trips measured
//! by a connection manager.

use crate::domain::provider::HealthSample;

/// Sink for provider health samples.
pub trait HealthSink: Send + Sync {
    /// Record one sample.
    fn record_health(&self, sample: HealthSample);
}

/// Health sink that drops every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHealthSink;

impl HealthSink for NoOpHealthSink {
    fn record_health(&self, _sample: HealthSample) {}
}
