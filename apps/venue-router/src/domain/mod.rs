//! Domain Layer
//!
//! Pure types and algorithms with no I/O:
//!
//! - [`order`]: order requests and placed orders
//! - [`provider`]: capabilities, routing metrics, health samples
//! - [`routing`]: strategies, scoring, allocation, routing results
//! - [`connection`]: connection state machine
//! - [`subscription`]: subscriptions and their registry
//! - [`wire`]: JSON envelope and inbound message decoding

pub mod connection;
pub mod order;
pub mod provider;
pub mod routing;
pub mod subscription;
pub mod wire;
