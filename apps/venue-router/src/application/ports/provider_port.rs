//! Provider Port (Driven Port)
//!
//! Interface the router uses to place order legs with a provider.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::{OrderRequest, OrderSide, OrderType, PlacedOrder, TimeInForce};
use crate::domain::provider::{ProviderCapabilities, ProviderId};

/// One order leg sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    /// Target provider.
    pub provider_id: ProviderId,
    /// Symbol to trade.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Leg quantity.
    pub quantity: Decimal,
    /// Limit price.
    pub price: Option<Decimal>,
    /// Time in force.
    pub time_in_force: TimeInForce,
}

impl PlaceOrderRequest {
    /// Build a leg of `order` for one provider.
    #[must_use]
    pub fn leg(order: &OrderRequest, provider_id: impl Into<ProviderId>, quantity: Decimal) -> Self {
        Self {
            provider_id: provider_id.into(),
            symbol: order.symbol().to_string(),
            side: order.side(),
            order_type: order.order_type(),
            quantity,
            price: order.price(),
            time_in_force: order.time_in_force(),
        }
    }
}

/// Provider adapter error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// Order rejected by the provider.
    #[error("Order rejected: {reason}")]
    Rejected {
        /// Rejection reason.
        reason: String,
    },

    /// Provider could not be reached.
    #[error("Provider unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },
}

/// Port for provider order placement.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider this adapter talks to.
    fn provider_id(&self) -> ProviderId;

    /// Declared capabilities.
    async fn capabilities(&self) -> ProviderCapabilities;

    /// Place one order.
    async fn place_order(&self, request: PlaceOrderRequest) -> Result<PlacedOrder, AdapterError>;
}
