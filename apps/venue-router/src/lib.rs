#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Venue Router - Multi-Provider Order Routing
//!
//! Scores execution providers on price, latency, cost, reliability and
//! liquidity, splits large orders across the best of them, and keeps one
//! resilient multiplexed realtime connection per provider.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure routing and streaming types
//!   - `order`: Order requests and placed orders
//!   - `provider`: Capabilities and live routing metrics
//!   - `routing`: Strategies, scoring, allocation, routing results
//!   - `connection`, `subscription`, `wire`: Stream state and envelope
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Provider adapters, transports, health sinks
//!   - `services`: Provider registry, metrics evaluation, order router
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stream`: Connection manager, WebSocket and in-memory transports
//!   - `broker`: Simulated provider adapter
//!   - `config`: Environment configuration
//!   - `telemetry`: Tracing subscriber and OTLP export
//!
//! # Data Flow
//!
//! ```text
//! Provider WS ──► ConnectionManager ──► subscription callbacks
//!                       │ (ping RTT)            │ (quotes)
//!                       ▼                       ▼
//!                 ProviderRegistry ◄──── OrderRouter::update_quote
//!                       │
//!                       ▼
//! OrderRequest ──► OrderRouter::route_order ──► RoutingResult ──► legs
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Circuit breaker for provider calls.
pub mod resilience;

/// Prometheus metrics.
pub mod metrics;

/// Error types.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::ConnectionState;
pub use domain::order::{OrderRequest, OrderSide, OrderType, PlacedOrder, TimeInForce};
pub use domain::provider::{HealthSample, ProviderCapabilities, ProviderId, RoutingMetrics};
pub use domain::routing::{LegResult, RoutingPriority, RoutingResult, RoutingStrategy};
pub use domain::subscription::{Subscription, SubscriptionType};
pub use domain::wire::{DataMessage, WireMessage};

// Application
pub use application::ports::{Connector, HealthSink, ProviderAdapter};
pub use application::services::{OrderRouter, ProviderRegistry, RouterSettings, RoutingStatistics};

// Infrastructure
pub use infrastructure::config::{AppConfig, ConfigError, ProviderEndpoint};
pub use infrastructure::stream::{
    ConnectionEvent, ConnectionManager, ConnectionSettings, ConnectionStats, SubscriptionHandle,
};

// Errors
pub use error::{ConnectionError, ErrorCode, LegExecutionError, RoutingError};

// Metrics
pub use crate::metrics::{get_metrics_handle, init_metrics};
