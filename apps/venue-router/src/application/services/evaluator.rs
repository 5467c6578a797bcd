//! Metrics Evaluator
//!
//! Adjusts provider metrics for market conditions:
//!
//! - session latency penalty inside the opening/closing windows
//! - liquidity estimate from typical liquidity scaled by reliability
//! - large-order latency penalty, applied per routing call
//!
//! Refreshes are throttled by `metrics_refresh_interval` and publish a whole
//! new registry snapshot.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use crate::domain::provider::RoutingMetrics;

use super::registry::ProviderRegistry;
use super::settings::RouterSettings;

/// Refreshes and adjusts routing metrics.
#[derive(Debug)]
pub struct MetricsEvaluator {
    settings: RouterSettings,
    last_refresh: Mutex<Option<DateTime<Utc>>>,
}

impl MetricsEvaluator {
    /// Create an evaluator.
    #[must_use]
    pub const fn new(settings: RouterSettings) -> Self {
        Self {
            settings,
            last_refresh: Mutex::new(None),
        }
    }

    /// Refresh the registry if the refresh interval has elapsed.
    ///
    /// Returns true when a refresh ran.
    pub fn refresh_if_due(&self, registry: &ProviderRegistry, now: DateTime<Utc>) -> bool {
        {
            let mut last = self.last_refresh.lock();
            let due = last.is_none_or(|at| {
                (now - at)
                    .to_std()
                    .is_ok_and(|elapsed| elapsed >= self.settings.metrics_refresh_interval)
            });
            if !due {
                return false;
            }
            *last = Some(now);
        }
        self.refresh(registry, now);
        true
    }

    /// Recompute session-adjusted latency and liquidity for every provider.
    pub fn refresh(&self, registry: &ProviderRegistry, now: DateTime<Utc>) {
        let volatile = self.settings.session.is_volatile(now);
        let factor = if volatile {
            self.settings.session_latency_penalty
        } else {
            1.0
        };
        let now_ms = now.timestamp_millis();
        let count = registry.update(|snapshot| {
            for entry in snapshot.iter_mut() {
                let metrics = &mut entry.metrics;
                metrics.latency_ms = metrics.base_latency_ms * factor;
                let reliability = Decimal::from_f64(metrics.reliability.clamp(0.0, 100.0))
                    .unwrap_or(Decimal::ONE_HUNDRED);
                metrics.liquidity =
                    entry.capabilities.typical_liquidity * reliability / Decimal::ONE_HUNDRED;
                metrics.last_updated = now_ms;
            }
            snapshot.len()
        });
        tracing::debug!(providers = count, volatile, "Routing metrics refreshed");
    }

    /// Metrics adjusted for the size of one order.
    #[must_use]
    pub fn order_adjusted(&self, metrics: &RoutingMetrics, notional: Decimal) -> RoutingMetrics {
        let mut adjusted = metrics.clone();
        if notional > self.settings.large_order_notional {
            adjusted.latency_ms *= self.settings.large_order_latency_penalty;
        }
        adjusted
    }
}
