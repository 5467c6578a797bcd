//! Application Ports (Driven)
//!
//! Interfaces the services use to reach the outside world.

mod health_port;
mod provider_port;
mod transport_port;

pub use health_port::{HealthSink, NoOpHealthSink};
#[cfg(test)]
pub use provider_port::MockProviderAdapter;
pub use provider_port::{AdapterError, PlaceOrderRequest, ProviderAdapter};
pub use transport_port::{Connector, TransportError, TransportFrame, TransportLink};
