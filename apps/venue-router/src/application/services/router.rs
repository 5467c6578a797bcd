//! Order Router
//!
//! Scores eligible providers for an order, decides whether to split it,
//! allocates quantities and dispatches legs.
//!
//! # Routing Steps
//!
//! 1. Validate the order
//! 2. Refresh metrics if the refresh interval elapsed
//! 3. Filter providers by trading flag, order type and minimum size
//! 4. Score and stable-sort (ties keep registration order)
//! 5. Split when enabled and the order is large with several candidates, or
//!    the top two scores are close
//! 6. Allocate proportionally to score, or send everything to the top
//!    provider and list runner-ups as alternatives
//! 7. Compute expected price, cost, latency and confidence

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::application::ports::{PlaceOrderRequest, ProviderAdapter};
use crate::domain::order::OrderRequest;
use crate::domain::provider::{HealthSample, ProviderCapabilities, ProviderId, RoutingMetrics};
use crate::domain::routing::{
    LegResult, RoutingAlternative, RoutingPriority, RoutingResult, RoutingStrategy,
    ScoredProvider, allocate_proportional, confidence, score_providers,
};
use crate::error::{LegExecutionError, RoutingError};
use crate::metrics;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};

use super::evaluator::MetricsEvaluator;
use super::registry::{ProviderRegistry, RegistrySnapshot};
use super::settings::RouterSettings;

/// Aggregate router statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingStatistics {
    /// Registered providers.
    pub total_providers: usize,
    /// Providers with trading enabled.
    pub active_providers: Vec<ProviderId>,
    /// Mean latency across providers, in milliseconds.
    pub average_latency_ms: f64,
    /// Mean reliability across providers.
    pub average_reliability: f64,
    /// Orders routed since start.
    pub orders_routed: u64,
    /// Orders split across providers since start.
    pub split_orders: u64,
}

/// Multi-provider order router.
pub struct OrderRouter {
    settings: RouterSettings,
    registry: Arc<ProviderRegistry>,
    evaluator: MetricsEvaluator,
    adapters: RwLock<HashMap<ProviderId, Arc<dyn ProviderAdapter>>>,
    breakers: RwLock<HashMap<ProviderId, Arc<CircuitBreaker>>>,
    breaker_config: CircuitBreakerConfig,
    orders_routed: AtomicU64,
    split_orders: AtomicU64,
}

impl std::fmt::Debug for OrderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderRouter")
            .field("settings", &self.settings)
            .field("providers", &self.registry.snapshot().len())
            .field("adapters", &self.adapters.read().len())
            .finish_non_exhaustive()
    }
}

impl OrderRouter {
    /// Create a router with its own registry.
    #[must_use]
    pub fn new(settings: RouterSettings) -> Self {
        Self::with_registry(settings, Arc::new(ProviderRegistry::new()))
    }

    /// Create a router over a shared registry.
    #[must_use]
    pub fn with_registry(settings: RouterSettings, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            evaluator: MetricsEvaluator::new(settings.clone()),
            settings,
            registry,
            adapters: RwLock::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
            breaker_config: CircuitBreakerConfig::default(),
            orders_routed: AtomicU64::new(0),
            split_orders: AtomicU64::new(0),
        }
    }

    /// Use a custom circuit breaker configuration for order legs.
    #[must_use]
    pub fn with_circuit_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Router settings.
    #[must_use]
    pub const fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Shared provider registry.
    #[must_use]
    pub fn registry(&self) -> Arc<ProviderRegistry> {
        Arc::clone(&self.registry)
    }

    // =========================================================================
    // Provider Management
    // =========================================================================

    /// Register or replace a provider.
    pub fn register_provider(&self, id: impl Into<ProviderId>, capabilities: ProviderCapabilities) {
        self.registry.register(id, capabilities);
    }

    /// Remove a provider with its adapter and circuit breaker.
    pub fn unregister_provider(&self, id: &str) -> bool {
        self.adapters.write().remove(id);
        self.breakers.write().remove(id);
        self.registry.unregister(id)
    }

    /// Register a provider adapter, fetching its capabilities.
    pub async fn register_adapter(&self, adapter: Arc<dyn ProviderAdapter>) {
        let id = adapter.provider_id();
        let capabilities = adapter.capabilities().await;
        self.registry.register(id.clone(), capabilities);
        self.adapters.write().insert(id, adapter);
    }

    /// Record a quoted price for a provider.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::UnknownProvider`] if the provider is not
    /// registered.
    pub fn update_quote(&self, id: &str, price: Decimal) -> Result<(), RoutingError> {
        self.registry.update_quote(id, price)
    }

    /// Apply a health sample.
    pub fn record_health_sample(&self, sample: &HealthSample) {
        self.registry.apply_health(sample);
    }

    /// Circuit breaker guarding order legs for a provider.
    #[must_use]
    pub fn circuit_breaker(&self, id: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(id) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write();
        Arc::clone(breakers.entry(id.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                format!("orders:{id}"),
                self.breaker_config.clone(),
            ))
        }))
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Route an order.
    ///
    /// Uses [`RoutingStrategy::Balanced`] when no priority is given.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::InvalidOrder`] for a bad order and
    /// [`RoutingError::NoEligibleProviders`] when every provider is
    /// filtered out.
    pub fn route_order(
        &self,
        order: &OrderRequest,
        priority: Option<RoutingPriority>,
    ) -> Result<RoutingResult, RoutingError> {
        let outcome = order.validate().and_then(|()| {
            self.evaluator.refresh_if_due(&self.registry, Utc::now());
            let snapshot = self.registry.snapshot();
            self.plan(order, priority.unwrap_or_default(), &snapshot)
        });

        match &outcome {
            Ok(result) => {
                self.orders_routed.fetch_add(1, Ordering::Relaxed);
                if result.is_split {
                    self.split_orders.fetch_add(1, Ordering::Relaxed);
                }
                metrics::record_order_routed(&result.strategy.to_string(), result.is_split);
                tracing::info!(
                    symbol = %order.symbol(),
                    side = %order.side(),
                    quantity = %order.quantity(),
                    strategy = %result.strategy,
                    providers = ?result.selected_providers,
                    split = result.is_split,
                    confidence = result.confidence,
                    "Order routed"
                );
            }
            Err(e) => {
                metrics::record_routing_failure(e.code().reason());
                tracing::warn!(symbol = %order.symbol(), error = %e, "Routing failed");
            }
        }
        outcome
    }

    /// Build a plan against one snapshot.
    fn plan(
        &self,
        order: &OrderRequest,
        priority: RoutingPriority,
        snapshot: &RegistrySnapshot,
    ) -> Result<RoutingResult, RoutingError> {
        if snapshot.is_empty() {
            return Err(RoutingError::NoEligibleProviders {
                symbol: order.symbol().to_string(),
                reason: "no providers registered".to_string(),
            });
        }

        let best_quote = snapshot.iter().filter_map(|e| e.metrics.price).min();
        let reference_price = order.price().or(best_quote).unwrap_or(Decimal::ZERO);
        let notional = order.notional(reference_price);

        let mut rejections = Vec::new();
        let mut candidates = Vec::new();
        for entry in snapshot.iter() {
            match entry
                .capabilities
                .check_eligible(order, entry.metrics.price.or(best_quote))
            {
                Ok(()) => candidates.push((
                    entry.id.clone(),
                    self.evaluator.order_adjusted(&entry.metrics, notional),
                )),
                Err(reason) => rejections.push(format!("{}: {reason}", entry.id)),
            }
        }
        if candidates.is_empty() {
            return Err(RoutingError::NoEligibleProviders {
                symbol: order.symbol().to_string(),
                reason: rejections.join("; "),
            });
        }

        let weights = priority.effective_weights();
        let scored = score_providers(candidates, &weights, notional.to_f64().unwrap_or(0.0));

        let close_scores = scored.len() > 1
            && scored[0].score - scored[1].score < self.settings.split_score_gap;
        let large_order = scored.len() > 1 && notional > self.settings.min_order_size;
        let split = self.settings.enable_split_orders && (large_order || close_scores);

        let (selected, allocations, alternatives_from) = if split {
            let count = self.settings.max_split_providers.max(1).min(scored.len());
            let shares: Vec<(ProviderId, f64)> = scored[..count]
                .iter()
                .map(|s| (s.provider_id.clone(), s.score))
                .collect();
            let legs = allocate_proportional(order.quantity(), &shares);
            (
                legs.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>(),
                legs,
                count,
            )
        } else {
            let top = scored[0].provider_id.clone();
            (vec![top.clone()], vec![(top, order.quantity())], 1)
        };

        let by_id: HashMap<&str, &ScoredProvider> =
            scored.iter().map(|s| (s.provider_id.as_str(), s)).collect();
        let legs: Vec<(&ScoredProvider, Decimal)> = allocations
            .iter()
            .filter_map(|(id, qty)| by_id.get(id.as_str()).map(|s| (*s, *qty)))
            .collect();

        let expected_price = weighted_price(&legs, order.price());
        let estimated_cost = legs
            .iter()
            .map(|(s, qty)| leg_cost(&s.metrics, *qty, order.price()))
            .sum();
        let estimated_latency_ms = legs
            .iter()
            .map(|(s, _)| s.metrics.latency_ms)
            .fold(0.0, f64::max);
        let scores: Vec<f64> = legs.iter().map(|(s, _)| s.score).collect();
        let is_split = legs.len() > 1;

        let alternatives: Vec<RoutingAlternative> = scored
            .iter()
            .skip(alternatives_from)
            .take(self.settings.max_alternatives)
            .map(|s| RoutingAlternative {
                provider_id: s.provider_id.clone(),
                score: s.score,
                expected_price: s.metrics.price.or(order.price()),
                estimated_cost: leg_cost(&s.metrics, order.quantity(), order.price()),
                estimated_latency_ms: s.metrics.latency_ms,
            })
            .collect();

        let strategy = priority.strategy;
        let reasoning = reasoning(strategy, &legs, scored.len(), split, close_scores, large_order);

        Ok(RoutingResult {
            order: order.clone(),
            selected_providers: selected,
            strategy,
            priority,
            total_quantity: order.quantity(),
            allocated_quantities: allocations.into_iter().collect(),
            expected_price,
            estimated_cost,
            estimated_latency_ms,
            confidence: confidence(&scores),
            reasoning,
            alternatives,
            is_split,
        })
    }

    /// Re-route if a selected provider's live price drifted.
    ///
    /// Returns the original plan unchanged unless some selected provider's
    /// live price differs from the original expected price by more than
    /// `rebalance_threshold` (relative). Live metrics override the
    /// registry's for the re-scoring only, and the original priority,
    /// custom weights included, is scored again.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::route_order`] when re-routing.
    pub fn rebalance_order(
        &self,
        original: &RoutingResult,
        live_metrics: &HashMap<ProviderId, RoutingMetrics>,
    ) -> Result<RoutingResult, RoutingError> {
        let Some(expected) = original.expected_price.filter(|p| *p > Decimal::ZERO) else {
            return Ok(original.clone());
        };
        let drifted = original.selected_providers.iter().find_map(|id| {
            let live = live_metrics.get(id)?.price?;
            let drift = ((live - expected) / expected).abs().to_f64()?;
            (drift > self.settings.rebalance_threshold).then_some((id, drift))
        });
        let Some((provider, drift)) = drifted else {
            tracing::debug!(symbol = %original.order.symbol(), "No price drift, keeping plan");
            return Ok(original.clone());
        };

        tracing::info!(
            symbol = %original.order.symbol(),
            provider = %provider,
            drift,
            threshold = self.settings.rebalance_threshold,
            "Price drift detected, re-routing"
        );
        let mut snapshot = RegistrySnapshot::clone(&self.registry.snapshot());
        for entry in snapshot.iter_mut() {
            if let Some(live) = live_metrics.get(&entry.id) {
                entry.metrics = live.clone();
            }
        }
        self.plan(&original.order, original.priority, &snapshot)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Dispatch one leg per provider concurrently.
    ///
    /// Each leg succeeds or fails on its own; a failed leg never cancels or
    /// rolls back the others. Results come back in `provider_ids` order.
    pub async fn execute_split_order(
        &self,
        order: &OrderRequest,
        provider_ids: &[ProviderId],
        allocations: &HashMap<ProviderId, Decimal>,
    ) -> Vec<LegResult> {
        let legs = provider_ids.iter().map(|id| {
            let quantity = allocations.get(id).copied().unwrap_or(Decimal::ZERO);
            self.execute_leg(order, id, quantity)
        });
        let results = join_all(legs).await;

        let failed = results.iter().filter(|r| !r.is_success()).count();
        if failed > 0 {
            tracing::warn!(
                symbol = %order.symbol(),
                legs = results.len(),
                failed,
                "Split order completed with failed legs"
            );
        } else {
            tracing::info!(symbol = %order.symbol(), legs = results.len(), "Split order placed");
        }
        results
    }

    /// Dispatch every leg of a routing plan.
    pub async fn execute(&self, plan: &RoutingResult) -> Vec<LegResult> {
        self.execute_split_order(&plan.order, &plan.selected_providers, &plan.allocated_quantities)
            .await
    }

    async fn execute_leg(&self, order: &OrderRequest, provider_id: &str, quantity: Decimal) -> LegResult {
        let started = Instant::now();
        let outcome = self.place_leg(order, provider_id, quantity).await;
        metrics::record_leg(provider_id, outcome.is_ok(), started.elapsed());
        match &outcome {
            Ok(placed) => tracing::debug!(
                provider = %provider_id,
                provider_order_id = %placed.provider_order_id,
                quantity = %quantity,
                "Order leg placed"
            ),
            Err(e) => tracing::warn!(
                provider = %provider_id,
                quantity = %quantity,
                error = %e,
                "Order leg failed"
            ),
        }
        LegResult {
            provider_id: provider_id.to_string(),
            quantity,
            outcome,
        }
    }

    async fn place_leg(
        &self,
        order: &OrderRequest,
        provider_id: &str,
        quantity: Decimal,
    ) -> Result<crate::domain::order::PlacedOrder, LegExecutionError> {
        if quantity <= Decimal::ZERO {
            return Err(LegExecutionError::InvalidAllocation {
                provider: provider_id.to_string(),
                reason: format!("quantity must be positive, got {quantity}"),
            });
        }
        let adapter = self
            .adapters
            .read()
            .get(provider_id)
            .cloned()
            .ok_or_else(|| LegExecutionError::NoAdapter(provider_id.to_string()))?;

        let breaker = self.circuit_breaker(provider_id);
        if !breaker.try_acquire() {
            return Err(LegExecutionError::CircuitOpen(provider_id.to_string()));
        }

        let request = PlaceOrderRequest::leg(order, provider_id, quantity);
        match tokio::time::timeout(self.settings.leg_timeout, adapter.place_order(request)).await {
            Ok(Ok(placed)) => {
                breaker.record_success();
                Ok(placed)
            }
            Ok(Err(e)) => {
                breaker.record_failure();
                Err(LegExecutionError::Rejected {
                    provider: provider_id.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                breaker.record_failure();
                Err(LegExecutionError::Timeout {
                    provider: provider_id.to_string(),
                    timeout: self.settings.leg_timeout,
                })
            }
        }
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Aggregate statistics.
    #[must_use]
    pub fn routing_statistics(&self) -> RoutingStatistics {
        let snapshot = self.registry.snapshot();
        let total = snapshot.len();
        let (latency_sum, reliability_sum) = snapshot.iter().fold((0.0, 0.0), |(l, r), e| {
            (l + e.metrics.latency_ms, r + e.metrics.reliability)
        });
        let mean = |sum: f64| if total == 0 { 0.0 } else { sum / total as f64 };
        RoutingStatistics {
            total_providers: total,
            active_providers: snapshot
                .iter()
                .filter(|e| e.capabilities.trading_enabled)
                .map(|e| e.id.clone())
                .collect(),
            average_latency_ms: mean(latency_sum),
            average_reliability: mean(reliability_sum),
            orders_routed: self.orders_routed.load(Ordering::Relaxed),
            split_orders: self.split_orders.load(Ordering::Relaxed),
        }
    }
}

/// Price a leg fills at: the provider's quote, else the order's price.
fn leg_price(metrics: &RoutingMetrics, order_price: Option<Decimal>) -> Option<Decimal> {
    metrics.price.or(order_price)
}

fn leg_cost(metrics: &RoutingMetrics, quantity: Decimal, order_price: Option<Decimal>) -> Decimal {
    leg_price(metrics, order_price).map_or(Decimal::ZERO, |price| quantity * price * metrics.cost)
}

fn weighted_price(legs: &[(&ScoredProvider, Decimal)], order_price: Option<Decimal>) -> Option<Decimal> {
    let (value, quantity) = legs.iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(value, quantity), (s, qty)| match leg_price(&s.metrics, order_price) {
            Some(price) => (value + price * *qty, quantity + *qty),
            None => (value, quantity),
        },
    );
    (quantity > Decimal::ZERO).then(|| value / quantity)
}

fn reasoning(
    strategy: RoutingStrategy,
    legs: &[(&ScoredProvider, Decimal)],
    eligible: usize,
    split: bool,
    close_scores: bool,
    large_order: bool,
) -> String {
    let summary = legs
        .iter()
        .map(|(s, qty)| format!("{} (score {:.1}, qty {qty})", s.provider_id, s.score))
        .collect::<Vec<_>>()
        .join(", ");
    if legs.len() > 1 {
        let why = match (large_order, close_scores) {
            (true, true) => "large order with close scores",
            (true, false) => "order notional above split threshold",
            _ => "top scores within split gap",
        };
        format!("{strategy}: split across {} of {eligible} eligible providers ({why}): {summary}", legs.len())
    } else if split {
        format!("{strategy}: split requested but allocation collapsed to one leg: {summary}")
    } else {
        format!("{strategy}: routed to top-scored provider of {eligible} eligible: {summary}")
    }
}
