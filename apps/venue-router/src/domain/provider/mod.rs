//! Provider Domain
//!
//! Static capability descriptors and the live metrics the router scores.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::domain::order::{OrderRequest, OrderType};

/// Provider identifier.
pub type ProviderId = String;

/// What a provider declares it can do.
///
/// The last four fields are hints used to seed [`RoutingMetrics`] before any
/// live sample arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapabilities {
    /// Whether order placement is enabled.
    pub trading_enabled: bool,
    /// Order types the provider accepts.
    pub supported_order_types: Vec<OrderType>,
    /// Markets the provider can reach.
    pub supported_markets: Vec<String>,
    /// Minimum order notional.
    pub min_order_size: Decimal,
    /// Requests per second the provider tolerates.
    pub rate_limit_per_sec: u32,
    /// Declared average latency in milliseconds.
    pub average_latency_ms: f64,
    /// Declared uptime percentage (0-100).
    pub uptime_pct: f64,
    /// Fee rate as a fraction of notional.
    pub fee_rate: Decimal,
    /// Notional the provider can usually absorb.
    pub typical_liquidity: Decimal,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            trading_enabled: true,
            supported_order_types: vec![
                OrderType::Market,
                OrderType::Limit,
                OrderType::Stop,
                OrderType::StopLimit,
            ],
            supported_markets: Vec::new(),
            min_order_size: Decimal::ZERO,
            rate_limit_per_sec: 20,
            average_latency_ms: 100.0,
            uptime_pct: 99.0,
            fee_rate: Decimal::new(15, 5),
            typical_liquidity: Decimal::new(1_000_000_000, 0),
        }
    }
}

impl ProviderCapabilities {
    /// Check whether this provider can take `order`.
    ///
    /// `reference_price` prices market orders for the minimum-size check;
    /// with no price at all the size check is skipped.
    ///
    /// # Errors
    ///
    /// Returns a short reason when the provider is filtered out.
    pub fn check_eligible(
        &self,
        order: &OrderRequest,
        reference_price: Option<Decimal>,
    ) -> Result<(), String> {
        if !self.trading_enabled {
            return Err("trading disabled".to_string());
        }
        if !self.supported_order_types.contains(&order.order_type()) {
            return Err(format!("{} orders not supported", order.order_type()));
        }
        let Some(price) = order.price().or(reference_price) else {
            return Ok(());
        };
        let notional = order.quantity() * price;
        if notional < self.min_order_size {
            return Err(format!(
                "notional {notional} below minimum {}",
                self.min_order_size
            ));
        }
        Ok(())
    }
}

/// Live routing metrics for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingMetrics {
    /// Latest quoted price, if any.
    pub price: Option<Decimal>,
    /// Effective latency in milliseconds, after market-condition penalties.
    pub latency_ms: f64,
    /// Latency last observed before penalties.
    pub base_latency_ms: f64,
    /// Fee rate as a fraction of notional.
    pub cost: Decimal,
    /// Reliability (0-100).
    pub reliability: f64,
    /// Estimated absorbable notional.
    pub liquidity: Decimal,
    /// Last computed score (0-100). Display cache only.
    pub score: f64,
    /// Last update, epoch milliseconds.
    pub last_updated: i64,
}

impl RoutingMetrics {
    /// Seed metrics from capability hints.
    #[must_use]
    pub fn seeded(capabilities: &ProviderCapabilities, now_ms: i64) -> Self {
        Self {
            price: None,
            latency_ms: capabilities.average_latency_ms,
            base_latency_ms: capabilities.average_latency_ms,
            cost: capabilities.fee_rate,
            reliability: capabilities.uptime_pct.clamp(0.0, 100.0),
            liquidity: capabilities.typical_liquidity,
            score: 0.0,
            last_updated: now_ms,
        }
    }

    /// Quoted price as `f64`, if any.
    #[must_use]
    pub fn price_f64(&self) -> Option<f64> {
        self.price.and_then(|p| p.to_f64()).filter(|p| *p > 0.0)
    }

    /// Fee rate as `f64`.
    #[must_use]
    pub fn cost_f64(&self) -> f64 {
        self.cost.to_f64().unwrap_or(0.0).max(0.0)
    }

    /// Liquidity as `f64`.
    #[must_use]
    pub fn liquidity_f64(&self) -> f64 {
        self.liquidity.to_f64().unwrap_or(0.0).max(0.0)
    }
}

/// A health observation for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSample {
    /// Provider id.
    pub provider_id: ProviderId,
    /// Observed latency in milliseconds.
    pub latency_ms: f64,
    /// Observed reliability percentage, if measured.
    pub reliability_pct: Option<f64>,
}

impl HealthSample {
    /// Latency-only sample, as produced by ping round trips.
    #[must_use]
    pub fn latency(provider_id: impl Into<ProviderId>, latency_ms: f64) -> Self {
        Self {
            provider_id: provider_id.into(),
            latency_ms,
            reliability_pct: None,
        }
    }
}
