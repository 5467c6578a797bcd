//! Routing plans and per-leg dispatch outcomes.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::order::{OrderRequest, PlacedOrder};
use crate::domain::provider::ProviderId;
use crate::error::LegExecutionError;

use super::strategy::{RoutingPriority, RoutingStrategy};

/// A runner-up single-provider plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingAlternative {
    /// Provider id.
    pub provider_id: ProviderId,
    /// Score at routing time.
    pub score: f64,
    /// Price the order would likely fill at.
    pub expected_price: Option<Decimal>,
    /// Fees for the whole order on this provider.
    pub estimated_cost: Decimal,
    /// Latency in milliseconds.
    pub estimated_latency_ms: f64,
}

/// The plan produced by one routing call.
///
/// Built fresh for every call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingResult {
    /// The order that was routed.
    pub order: OrderRequest,
    /// Selected providers, best first.
    pub selected_providers: Vec<ProviderId>,
    /// Strategy used.
    pub strategy: RoutingStrategy,
    /// Strategy and custom weights the plan was scored with. Re-routing
    /// reuses them.
    pub priority: RoutingPriority,
    /// Order quantity.
    pub total_quantity: Decimal,
    /// Quantity per selected provider. Values sum to `total_quantity`.
    pub allocated_quantities: HashMap<ProviderId, Decimal>,
    /// Quantity-weighted expected fill price.
    pub expected_price: Option<Decimal>,
    /// Fees summed across legs.
    pub estimated_cost: Decimal,
    /// Slowest selected leg, in milliseconds.
    pub estimated_latency_ms: f64,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Human-readable explanation.
    pub reasoning: String,
    /// Runner-up single-provider plans, best first.
    pub alternatives: Vec<RoutingAlternative>,
    /// Whether the order is split across providers.
    pub is_split: bool,
}

impl RoutingResult {
    /// Sum of all allocations.
    #[must_use]
    pub fn allocated_total(&self) -> Decimal {
        self.allocated_quantities.values().copied().sum()
    }

    /// Allocation for one provider, zero if not selected.
    #[must_use]
    pub fn allocation(&self, provider_id: &str) -> Decimal {
        self.allocated_quantities
            .get(provider_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

/// Outcome of one leg of a split order.
#[derive(Debug, Clone, PartialEq)]
pub struct LegResult {
    /// Provider the leg was sent to.
    pub provider_id: ProviderId,
    /// Quantity requested for the leg.
    pub quantity: Decimal,
    /// Placed order, or why the leg failed.
    pub outcome: Result<PlacedOrder, LegExecutionError>,
}

impl LegResult {
    /// Whether the leg was placed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Error for a failed leg.
    #[must_use]
    pub fn error(&self) -> Option<&LegExecutionError> {
        self.outcome.as_ref().err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderSide;
    use rust_decimal_macros::dec;

    #[test]
    fn allocation_helpers() {
        let order = OrderRequest::limit("AAPL", OrderSide::Buy, dec!(10), dec!(1));
        let result = RoutingResult {
            order,
            selected_providers: vec!["a".into(), "b".into()],
            strategy: RoutingStrategy::Balanced,
            priority: RoutingPriority::default(),
            total_quantity: dec!(10),
            allocated_quantities: HashMap::from([("a".into(), dec!(6)), ("b".into(), dec!(4))]),
            expected_price: Some(dec!(1)),
            estimated_cost: Decimal::ZERO,
            estimated_latency_ms: 10.0,
            confidence: 0.9,
            reasoning: String::new(),
            alternatives: Vec::new(),
            is_split: true,
        };
        assert_eq!(result.allocated_total(), dec!(10));
        assert_eq!(result.allocation("b"), dec!(4));
        assert_eq!(result.allocation("c"), Decimal::ZERO);
    }

    #[test]
    fn leg_result_reports_failure() {
        let leg = LegResult {
            provider_id: "a".into(),
            quantity: dec!(1),
            outcome: Err(LegExecutionError::NoAdapter("a".into())),
        };
        assert!(!leg.is_success());
        assert!(matches!(leg.error(), Some(LegExecutionError::NoAdapter(_))));
    }
}
