//! Order Request Types
//!
//! Immutable order requests handed to the router, plus the side, type and
//! time-in-force value objects they are built from.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::RoutingError;

// =============================================================================
// Value Objects
// =============================================================================

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type specifying execution behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Market order - execute at best available price.
    Market,
    /// Limit order - execute at specified price or better.
    Limit,
    /// Stop order - becomes market order when stop price is reached.
    Stop,
    /// Stop-limit order - becomes limit order when stop price is reached.
    StopLimit,
}

impl OrderType {
    /// Returns true for limit-class types, which require a positive price.
    #[must_use]
    pub const fn requires_limit_price(&self) -> bool {
        matches!(self, Self::Limit | Self::StopLimit)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
            Self::Stop => write!(f, "STOP"),
            Self::StopLimit => write!(f, "STOP_LIMIT"),
        }
    }
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    /// Valid for the trading day.
    #[default]
    Day,
    /// Good till cancelled.
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Fill or kill.
    Fok,
}

// =============================================================================
// Order Request
// =============================================================================

/// An order to be routed.
///
/// Fields are private so a request cannot change once built; use the
/// `with_*` builders while constructing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    symbol: String,
    side: OrderSide,
    order_type: OrderType,
    quantity: Decimal,
    price: Option<Decimal>,
    time_in_force: TimeInForce,
}

impl OrderRequest {
    /// Create a new order request without a price.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type,
            quantity,
            price: None,
            time_in_force: TimeInForce::default(),
        }
    }

    /// Convenience constructor for a limit order.
    #[must_use]
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self::new(symbol, side, OrderType::Limit, quantity).with_price(price)
    }

    /// Set the order price.
    #[must_use]
    pub const fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    /// Set the time in force.
    #[must_use]
    pub const fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = time_in_force;
        self
    }

    /// Instrument symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Order side.
    #[must_use]
    pub const fn side(&self) -> OrderSide {
        self.side
    }

    /// Order type.
    #[must_use]
    pub const fn order_type(&self) -> OrderType {
        self.order_type
    }

    /// Requested quantity.
    #[must_use]
    pub const fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// Limit price, if any.
    #[must_use]
    pub const fn price(&self) -> Option<Decimal> {
        self.price
    }

    /// Time in force.
    #[must_use]
    pub const fn time_in_force(&self) -> TimeInForce {
        self.time_in_force
    }

    /// Notional value using the order's own price, or `reference_price` when
    /// the order carries none (market orders).
    #[must_use]
    pub fn notional(&self, reference_price: Decimal) -> Decimal {
        self.quantity * self.price.unwrap_or(reference_price)
    }

    /// Validate the request.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::InvalidOrder`] when the symbol is blank, the
    /// quantity is not positive, or the price is missing/non-positive for a
    /// limit-class order.
    pub fn validate(&self) -> Result<(), RoutingError> {
        if self.symbol.trim().is_empty() {
            return Err(RoutingError::invalid_order("symbol is required"));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(RoutingError::invalid_order(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        match self.price {
            Some(price) if price <= Decimal::ZERO => Err(RoutingError::invalid_order(format!(
                "price must be positive, got {price}"
            ))),
            None if self.order_type.requires_limit_price() => Err(RoutingError::invalid_order(
                format!("{} order requires a price", self.order_type),
            )),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Placed Order
// =============================================================================

/// Acknowledgement returned by a provider adapter for one placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
    /// Provider that accepted the order.
    pub provider_id: String,
    /// Provider-assigned order id.
    pub provider_order_id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Quantity placed.
    pub quantity: Decimal,
    /// Price sent, if any.
    pub price: Option<Decimal>,
    /// When the provider accepted the order.
    pub accepted_at: DateTime<Utc>,
}
