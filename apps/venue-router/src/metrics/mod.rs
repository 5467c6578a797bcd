//! Prometheus Metrics Module
//!
//! # Metrics Categories
//!
//! - **Routing**: Orders routed, split orders, routing failures
//! - **Dispatch**: Order leg outcomes and latency
//! - **Connections**: Connection state, reconnects, keepalive round trips
//! - **Messages**: Inbound messages, malformed frames, callback failures
//! - **Resilience**: Circuit breaker transitions
//!
//! Recording functions are no-ops until [`init_metrics`] installs the
//! recorder, so library users and tests never need to initialize it.

use std::sync::OnceLock;
use std::time::Duration;

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the existing handle.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Routing
    describe_counter!(
        "venue_router_orders_routed_total",
        "Total orders routed by strategy and split flag"
    );
    describe_counter!(
        "venue_router_routing_failures_total",
        "Total routing calls that failed by error code"
    );

    // Dispatch
    describe_counter!(
        "venue_router_order_legs_total",
        "Total order legs dispatched by provider and outcome"
    );
    describe_histogram!(
        "venue_router_order_leg_seconds",
        "Time to place one order leg"
    );

    // Connections
    describe_gauge!(
        "venue_router_connection_state",
        "Connection state per provider (0=disconnected 1=connecting 2=connected 3=reconnecting 4=error)"
    );
    describe_counter!(
        "venue_router_reconnects_total",
        "Total reconnection attempts per provider"
    );
    describe_histogram!(
        "venue_router_ping_rtt_seconds",
        "Keepalive ping round trip per provider"
    );
    describe_gauge!(
        "venue_router_subscriptions",
        "Subscriptions per provider"
    );

    // Messages
    describe_counter!(
        "venue_router_messages_received_total",
        "Total inbound messages by provider and type"
    );
    describe_counter!(
        "venue_router_malformed_messages_total",
        "Total inbound frames dropped as malformed"
    );
    describe_counter!(
        "venue_router_callback_failures_total",
        "Total subscription callbacks that failed or panicked"
    );

    // Resilience
    describe_counter!(
        "venue_router_circuit_transitions_total",
        "Total circuit breaker state transitions"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a routed order.
pub fn record_order_routed(strategy: &str, split: bool) {
    counter!(
        "venue_router_orders_routed_total",
        "strategy" => strategy.to_string(),
        "split" => if split { "true" } else { "false" }
    )
    .increment(1);
}

/// Record a failed routing call.
pub fn record_routing_failure(reason: &'static str) {
    counter!("venue_router_routing_failures_total", "reason" => reason).increment(1);
}

/// Record the outcome of one order leg.
pub fn record_leg(provider: &str, success: bool, elapsed: Duration) {
    counter!(
        "venue_router_order_legs_total",
        "provider" => provider.to_string(),
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
    histogram!("venue_router_order_leg_seconds", "provider" => provider.to_string())
        .record(elapsed.as_secs_f64());
}

const fn state_value(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Reconnecting => 3.0,
        ConnectionState::Error => 4.0,
    }
}

/// Update the connection state gauge.
pub fn set_connection_state(provider: &str, state: ConnectionState) {
    gauge!("venue_router_connection_state", "provider" => provider.to_string())
        .set(state_value(state));
}

/// Record a reconnection attempt.
pub fn record_reconnect(provider: &str) {
    counter!("venue_router_reconnects_total", "provider" => provider.to_string()).increment(1);
}

/// Record a keepalive round trip.
pub fn record_ping_rtt(provider: &str, rtt: Duration) {
    histogram!("venue_router_ping_rtt_seconds", "provider" => provider.to_string())
        .record(rtt.as_secs_f64());
}

/// Update the subscription gauge.
pub fn set_subscriptions(provider: &str, count: usize) {
    gauge!("venue_router_subscriptions", "provider" => provider.to_string()).set(count as f64);
}

/// Record an inbound message.
pub fn record_message_received(provider: &str, kind: &'static str) {
    counter!(
        "venue_router_messages_received_total",
        "provider" => provider.to_string(),
        "type" => kind
    )
    .increment(1);
}

/// Record a malformed inbound frame.
pub fn record_malformed_message(provider: &str) {
    counter!("venue_router_malformed_messages_total", "provider" => provider.to_string())
        .increment(1);
}

/// Record a failed subscription callback.
pub fn record_callback_failure(provider: &str) {
    counter!("venue_router_callback_failures_total", "provider" => provider.to_string())
        .increment(1);
}

/// Record a circuit breaker transition.
pub fn record_circuit_transition(name: &str, to: &'static str) {
    counter!(
        "venue_router_circuit_transitions_total",
        "name" => name.to_string(),
        "to" => to
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_order_routed("balanced", true);
        record_leg("a", false, Duration::from_millis(3));
        set_connection_state("a", ConnectionState::Connected);
        record_circuit_transition("a", "OPEN");
    }

    #[test]
    fn state_gauge_values_are_distinct() {
        let values = [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Error,
        ]
        .map(state_value);
        assert_eq!(values, [0.0, 1.0, 2.0, 3.0, 4.0]);
    }
}
