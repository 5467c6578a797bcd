//! Simulated provider adapter.
//!
//! Accepts every order leg after an optional delay, or rejects every leg
//! when configured to fail. Provider order ids are sequential per adapter.
//! Used by the binary when a provider has no live adapter, and by tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::application::ports::{AdapterError, PlaceOrderRequest, ProviderAdapter};
use crate::domain::order::PlacedOrder;
use crate::domain::provider::{ProviderCapabilities, ProviderId};

/// How a simulated provider answers order legs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SimulatedBehavior {
    /// Accept every leg.
    #[default]
    Accept,
    /// Reject every leg with this reason.
    Reject(String),
}

/// Simulated provider adapter.
#[derive(Debug)]
pub struct SimulatedProviderAdapter {
    id: ProviderId,
    capabilities: ProviderCapabilities,
    behavior: SimulatedBehavior,
    latency: Duration,
    order_counter: AtomicU64,
}

impl SimulatedProviderAdapter {
    /// Create an adapter that accepts every leg immediately.
    #[must_use]
    pub fn new(id: impl Into<ProviderId>, capabilities: ProviderCapabilities) -> Self {
        Self {
            id: id.into(),
            capabilities,
            behavior: SimulatedBehavior::Accept,
            latency: Duration::ZERO,
            order_counter: AtomicU64::new(1),
        }
    }

    /// Reject every leg with `reason`.
    #[must_use]
    pub fn rejecting(mut self, reason: impl Into<String>) -> Self {
        self.behavior = SimulatedBehavior::Reject(reason.into());
        self
    }

    /// Wait `latency` before answering.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Legs answered so far.
    #[must_use]
    pub fn orders_seen(&self) -> u64 {
        self.order_counter.load(Ordering::SeqCst) - 1
    }
}

#[async_trait]
impl ProviderAdapter for SimulatedProviderAdapter {
    fn provider_id(&self) -> ProviderId {
        self.id.clone()
    }

    async fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    async fn place_order(&self, request: PlaceOrderRequest) -> Result<PlacedOrder, AdapterError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let seq = self.order_counter.fetch_add(1, Ordering::SeqCst);
        if let SimulatedBehavior::Reject(reason) = &self.behavior {
            return Err(AdapterError::Rejected {
                reason: reason.clone(),
            });
        }
        Ok(PlacedOrder {
            provider_id: self.id.clone(),
            provider_order_id: format!("{}-{seq}", self.id),
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.price,
            accepted_at: chrono::Utc::now(),
        })
    }
}
